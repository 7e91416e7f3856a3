//! Service database lookups.

use crate::ffi;

/// Returns the well-known service name for `port`, e.g. `http` for 80, optionally restricted to
/// a protocol such as `tcp`. Returns `None` when the service database has no entry.
pub fn service_name_for_port(port: u16, protocol: Option<&str>) -> Option<String> {
    ffi::getservbyport(port, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocol_has_no_entry() {
        assert_eq!(service_name_for_port(80, Some("no-such-proto")), None);
    }

    #[test]
    fn lookup_is_consistent() {
        // the service database may be absent in minimal environments
        if let Some(name) = service_name_for_port(80, Some("tcp")) {
            assert_eq!(service_name_for_port(80, Some("tcp")), Some(name));
        }
    }
}
