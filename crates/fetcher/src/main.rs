use compass_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            compass_observability::init();
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    compass_observability::init_with(settings.log_format);

    compass_destination_fetcher::service::run(settings).await
}
