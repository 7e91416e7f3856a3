//! Data type for constructing a service type

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A registration type such as `_http._tcp`, optionally narrowed by sub-types.
#[derive(Default, Debug, Getters, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceType {
    name: String,
    protocol: String,
    sub_types: Vec<String>,
}

impl ServiceType {
    /// Creates a new `ServiceType` with the specified name (e.g. `http`) and protocol (`tcp` or
    /// `udp`).
    pub fn new(name: &str, protocol: &str) -> Result<Self> {
        Self::with_sub_types(name, protocol, vec![])
    }

    /// Creates a new `ServiceType` with the specified name (e.g. `http`) and protocol (`tcp` or
    /// `udp`) and sub-types.
    pub fn with_sub_types(name: &str, protocol: &str, sub_types: Vec<&str>) -> Result<Self> {
        let protocol = check_valid_characters(protocol)?;
        if !protocol.eq_ignore_ascii_case("tcp") && !protocol.eq_ignore_ascii_case("udp") {
            return Err(Error::InvalidServiceType(format!(
                "protocol must be tcp or udp, got `{protocol}`"
            )));
        }

        Ok(Self {
            name: check_valid_characters(name)?.to_string(),
            protocol: protocol.to_string(),
            sub_types: sub_types
                .into_iter()
                .map(|s| check_valid_characters(s).map(|valid| valid.to_string()))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Returns the base registration type, e.g. `_http._tcp`, without sub-types.
    pub fn regtype(&self) -> String {
        format!("_{}._{}", self.name, self.protocol)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_regtype(self))
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s.split('.').collect::<Vec<_>>();

        if parts.len() != 2 {
            return Err(Error::InvalidServiceType(
                "invalid name and protocol".into(),
            ));
        }

        let name = lstrip_underscore(check_valid_characters(parts[0])?);
        let protocol = lstrip_underscore(check_valid_characters(parts[1])?);

        Self::new(name, protocol)
    }
}

/// Formats the specified `ServiceType` as a registration type string, sub-types separated by
/// commas (e.g. `_http._tcp,_printer`).
pub fn format_regtype(service_type: &ServiceType) -> String {
    let mut regtype = vec![service_type.regtype()];

    regtype.extend(
        service_type
            .sub_types()
            .iter()
            .map(|sub_type| format!("_{sub_type}")),
    );

    regtype.join(",")
}

/// Parses the specified `&str` into a `ServiceType`. A trailing dot is accepted.
pub fn parse_regtype(regtype: &str) -> Result<ServiceType> {
    let regtype = crate::name::normalize_domain(regtype);
    let types = regtype.split(',').collect::<Vec<_>>();
    let service_type = ServiceType::from_str(types[0])?;

    let sub_types = types[1..]
        .iter()
        .map(|s| check_valid_characters(lstrip_underscore(s)))
        .collect::<Result<Vec<_>>>()?;

    ServiceType::with_sub_types(service_type.name(), service_type.protocol(), sub_types)
}

pub fn check_valid_characters(part: &str) -> Result<&str> {
    if part.contains('.') {
        Err(Error::InvalidServiceType("invalid character: .".into()))
    } else if part.contains(',') {
        Err(Error::InvalidServiceType("invalid character: ,".into()))
    } else if part.contains('\0') {
        Err(Error::InvalidServiceType("invalid character: NUL".into()))
    } else if part.is_empty() {
        Err(Error::InvalidServiceType("cannot be empty".into()))
    } else {
        Ok(part)
    }
}

pub fn lstrip_underscore(s: &str) -> &str {
    s.strip_prefix('_').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_invalid() {
        ServiceType::new(".http", "tcp").expect_err("invalid character: .");
        ServiceType::new("http", ".tcp").expect_err("invalid character: .");
        ServiceType::new(",http", "tcp").expect_err("invalid character: ,");
        ServiceType::new("http", ",tcp").expect_err("invalid character: ,");
        ServiceType::new("", "tcp").expect_err("cannot be empty");
        ServiceType::new("http", "").expect_err("cannot be empty");
    }

    #[test]
    fn new_rejects_unknown_protocol() {
        assert_eq!(
            ServiceType::new("http", "sctp"),
            Err(Error::InvalidServiceType(
                "protocol must be tcp or udp, got `sctp`".into()
            ))
        );
    }

    #[test]
    fn parse_regtype_success() {
        assert_eq!(
            parse_regtype("_http._tcp,_printer1,_printer2").unwrap(),
            ServiceType::with_sub_types("http", "tcp", vec!["printer1", "printer2"]).unwrap()
        );
    }

    #[test]
    fn parse_regtype_success_no_subtypes() {
        assert_eq!(
            parse_regtype("_http._tcp.").unwrap(),
            ServiceType::new("http", "tcp").unwrap()
        );
    }

    #[test]
    fn parse_regtype_failure_invalid_regtype() {
        assert_eq!(
            parse_regtype("foobar"),
            Err(Error::InvalidServiceType("invalid name and protocol".into()))
        );
    }

    #[test]
    fn format_regtype_success() {
        assert_eq!(
            format_regtype(
                &ServiceType::with_sub_types("http", "tcp", vec!["printer1", "printer2"]).unwrap()
            ),
            "_http._tcp,_printer1,_printer2"
        );
    }

    #[test]
    fn display_matches_format_regtype() {
        let service_type = ServiceType::new("ipp", "tcp").unwrap();
        assert_eq!(service_type.to_string(), "_ipp._tcp");
        assert_eq!(service_type.regtype(), "_ipp._tcp");
    }
}
