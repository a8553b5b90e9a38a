use sysinfo::System;

pub const DISCORD_URL_ENV: &str = "VIGIL_DISCORD_URL";

pub const WEBHOOK_URL_ENV: &str = "VIGIL_WEBHOOK_URL";

pub const SLACK_TOKEN_ENV: &str = "VIGIL_SLACK_TOKEN";

pub const TEAMS_WEBHOOK_ENV: &str = "VIGIL_TEAMS_WEBHOOK";

const DEFAULT_HOST: &str = "localhost";

pub fn local_host_name() -> String {
    System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}
