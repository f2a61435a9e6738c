//! Packed network-compatibility version token.
//!
//! The first four bytes a native client sends are not a frame: they are the
//! client's compatibility version `a.b.c.d` packed as
//! `-(a * 1_000_000 + b * 10_000 + c * 100 + d)`. The negative sign keeps the
//! top byte non-zero, which is what separates native clients from
//! compatibility-protocol clients whose first word is a small packet length.

/// Compatibility version spoken by this server.
pub const NETWORK_COMPATIBILITY_VERSION: &str = "2.0.0.0";

/// Packs a dotted version string. Returns `None` for malformed versions.
pub fn to_token(version: &str) -> Option<i32> {
    let parts: Vec<i32> = version
        .split('.')
        .map(|p| p.parse::<i32>().ok().filter(|v| (0..100).contains(v)))
        .collect::<Option<_>>()?;
    let [a, b, c, d] = parts[..] else {
        return None;
    };
    Some(-(a * 1_000_000 + b * 10_000 + c * 100 + d))
}

/// Unpacks a token into its dotted form. Any token decodes to some string;
/// an unexpected one simply fails the comparison with the server version.
pub fn from_token(token: i32) -> String {
    let packed = -i64::from(token);
    format!(
        "{}.{}.{}.{}",
        packed / 1_000_000,
        (packed / 10_000) % 100,
        (packed / 100) % 100,
        packed % 100
    )
}
