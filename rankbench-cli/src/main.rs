fn main() -> anyhow::Result<()> {
    rankbench_cli::run()
}
