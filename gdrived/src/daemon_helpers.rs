async fn read_token_file(path: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(path).await.with_context(|| {
        format!(
            "GDRIVE_ACCESS_TOKEN is not set and the token file {} is unreadable",
            path.display()
        )
    })?;
    let token = raw.trim();
    anyhow::ensure!(!token.is_empty(), "token file {} is empty", path.display());
    Ok(token.to_string())
}

fn build_client(base_url: Option<&str>, token: &str) -> Result<DriveClient, DriveError> {
    match base_url {
        Some(url) => DriveClient::with_base_url(url, token.to_string()),
        None => DriveClient::new(token.to_string()),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_token_file(home: &Path) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home.join(".config"))
        .join("gdrived")
        .join("token")
}

fn read_u64_env<F>(env: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
