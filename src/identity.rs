//! Machine identity: the stable `hostname:mac:username` string that binds
//! the master key to this machine.

const NO_MAC: &str = "no-mac-available";

/// Compose the machine identity string.
///
/// Stable across process invocations as long as the host name, primary
/// interface MAC and OS username do not change. If any of them does, the
/// derived master key changes and existing entries become undecryptable;
/// that trade-off is the point of machine binding.
pub fn machine_identity() -> String {
    format!("{}:{}:{}", host_name(), primary_mac(), user_name())
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".into())
}

/// MAC of the first usable (non-loopback, non-zero) interface, lowercase
/// colon-separated, or `"no-mac-available"`.
fn primary_mac() -> String {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) if mac.bytes() != [0u8; 6] => {
            let b = mac.bytes();
            format!(
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            )
        }
        _ => NO_MAC.into(),
    }
}

fn user_name() -> String {
    let user = whoami::username();
    if user.is_empty() {
        "unknown-user".into()
    } else {
        user
    }
}
