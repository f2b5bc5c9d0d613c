//! Caddyfile generation for the reverse proxy in front of sing-box.
//!
//! WebSocket, HTTP-upgrade and gRPC traffic for `/trojan`, `/vmess` and
//! `/vless` is routed to local sing-box inbounds; everything else gets the
//! static security headers.

use crate::error::{Result, SbxError};
use crate::fsutil::{self, FILE_MODE};
use std::path::Path;
use tracing::info;

/// Cloudflare edge ranges, trusted for client address headers.
const TRUSTED_PROXIES: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
    "2a06:98c0::/29",
    "2c0f:f248::/32",
];

/// (path, backend) for WebSocket and gRPC inbounds.
const WEBSOCKET_BACKENDS: &[(&str, &str)] = &[
    ("/trojan", "127.0.0.1:8003"),
    ("/vmess", "127.0.0.1:8002"),
    ("/vless", "127.0.0.1:8001"),
    ("/trojan/Tun", "127.0.0.1:8007"),
    ("/vmess/Tun", "127.0.0.1:8008"),
    ("/vless/Tun", "127.0.0.1:8009"),
];

const HTTP_UPGRADE_BACKENDS: &[(&str, &str)] = &[
    ("/trojan", "127.0.0.1:8006"),
    ("/vmess", "127.0.0.1:8005"),
    ("/vless", "127.0.0.1:8004"),
];

fn path_map(placeholder: &str, entries: &[(&str, &str)]) -> String {
    let mut out = format!("map {{path}} {{{}}} {{\n", placeholder);
    for (path, backend) in entries {
        out.push_str(&format!("\t\t{} {}\n", path, backend));
    }
    out.push_str("\t}");
    out
}

/// Render the Caddyfile for `domain`, logging to `log_file`.
pub fn render(domain: &str, log_file: &Path) -> Result<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(SbxError::Input("domain cannot be empty".into()));
    }

    Ok(format!(
        r#"{{
	log {{
		output file {log_file} {{
			roll_keep 15
			roll_keep_for 48h
		}}
		format console
	}}
	servers {{
		trusted_proxies static {proxies}
	}}
}}

{domain}, http://{domain} {{
	@websocket {{
		header Connection *Upgrade*
		header Upgrade websocket
		header Sec-WebSocket-Key *
	}}
	@http_upgrade {{
		header Connection *Upgrade*
		header Upgrade websocket
		not header Sec-WebSocket-Key *
	}}
	@grpc {{
		header Content-Type "application/grpc"
		protocol grpc
	}}

	{websocket_map}
	{http_upgrade_map}

	handle @websocket {{
		@rewrite_path_websocket {{
			path_regexp ^/.*?/(trojan|vmess|vless)
		}}
		handle @rewrite_path_websocket {{
			rewrite * /{{http.regexp.1}}
		}}
		reverse_proxy {{backend}}
	}}

	handle @http_upgrade {{
		@rewrite_path_http_upgrade {{
			path_regexp ^/.*?/(trojan|vmess|vless)
		}}
		handle @rewrite_path_http_upgrade {{
			rewrite * /{{http.regexp.1}}
		}}
		reverse_proxy {{backend_http_upgrade}}
	}}

	handle @grpc {{
		reverse_proxy {{backend}} {{
			transport http {{
				versions h2c
			}}
		}}
	}}

	header {{
		Cache-Control "public, max-age=3600"
		X-Content-Type-Options "nosniff"
		X-Frame-Options "DENY"
		X-XSS-Protection "1; mode=block"
	}}
}}
"#,
        log_file = log_file.display(),
        proxies = TRUSTED_PROXIES.join(" "),
        domain = domain,
        websocket_map = path_map("backend", WEBSOCKET_BACKENDS),
        http_upgrade_map = path_map("backend_http_upgrade", HTTP_UPGRADE_BACKENDS),
    ))
}

/// Render and atomically write the Caddyfile to `path` (0644).
pub fn write(domain: &str, log_file: &Path, path: &Path) -> Result<()> {
    let content = render(domain, log_file)?;
    fsutil::write_atomic(path, content.as_bytes(), FILE_MODE)?;
    info!(path = %path.display(), domain, "Caddyfile written");
    Ok(())
}
