fn main() -> anyhow::Result<()> {
    weather_sync_lib::run()
}
