//! Client-side WireGuard configuration rendering

/// Inputs for a peer's client configuration
#[derive(Debug, Clone)]
pub struct PeerConfig<'a> {
    pub private_key: &'a str,
    /// The peer's own `/32`
    pub address: &'a str,
    pub server_public_key: &'a str,
    pub endpoint: &'a str,
    pub listen_port: u32,
    pub allowed_ips: &'a [String],
}

impl PeerConfig<'_> {
    /// Render the two-section config handed to the end user.
    pub fn render(&self) -> String {
        format!(
            r#"[Interface]
PrivateKey = {private_key}
Address = {address}

[Peer]
PublicKey = {server_public_key}
AllowedIPs = {allowed_ips}
Endpoint = {endpoint}
"#,
            private_key = self.private_key,
            address = self.address,
            server_public_key = self.server_public_key,
            allowed_ips = self.allowed_ips.join(", "),
            endpoint = endpoint_with_port(self.endpoint, self.listen_port),
        )
    }
}

/// Append the listen port unless the endpoint already carries one.
pub fn endpoint_with_port(endpoint: &str, listen_port: u32) -> String {
    let endpoint = endpoint.trim();
    let has_port = endpoint
        .rsplit_once(':')
        .map_or(false, |(host, port)| {
            !host.is_empty() && port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
        });
    if has_port || listen_port == 0 {
        endpoint.to_string()
    } else {
        format!("{}:{}", endpoint, listen_port)
    }
}

/// Rewrite only the `AllowedIPs =` line(s) of a rendered config.
///
/// Indentation and every other line are preserved. An empty config or an empty
/// destination list leaves the text unchanged.
pub fn rewrite_allowed_ips(config: &str, allowed_ips: &[String]) -> String {
    if config.is_empty() || allowed_ips.is_empty() {
        return config.to_string();
    }

    let joined = allowed_ips.join(", ");
    let mut updated = false;
    let lines: Vec<String> = config
        .split('\n')
        .map(|line| {
            if !line.trim_start().starts_with("AllowedIPs =") {
                return line.to_string();
            }
            match line.find("AllowedIPs =") {
                Some(idx) => {
                    updated = true;
                    format!("{}AllowedIPs = {}", &line[..idx], joined)
                }
                None => line.to_string(),
            }
        })
        .collect();

    if !updated {
        return config.to_string();
    }
    lines.join("\n")
}
