//! Encoding and decoding of service fullnames.
//!
//! A fullname joins the three parts of a service identity into one dot-terminated domain name,
//! e.g. a web server named `Dr. Pepper` is advertised as `Dr\.\032Pepper._http._tcp.local.`.
//! Literal dots and backslashes in the instance name are escaped with a backslash and bytes that
//! are not printable are written as a three digit decimal escape.

use crate::{Error, Result};
use std::fmt::{self, Write};

/// Maximum length of an escaped domain name, including the terminating NUL.
pub const MAX_DOMAIN_NAME: usize = 1009;

/// Controls how [`create_full_name()`] reacts to components that cannot be encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullNameMode {
    /// Return `Error::InvalidName`.
    #[default]
    Strict,
    /// Log a warning and fall back to concatenating the raw components.
    BestEffort,
}

/// The instance name, registration type and domain of a service along with its fullname.
#[derive(Debug, Clone, Getters, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceIdentity {
    name: String,
    regtype: String,
    domain: String,
    fullname: String,
}

impl ServiceIdentity {
    /// Creates a new `ServiceIdentity`, deriving the fullname with [`construct_full_name()`].
    pub fn new(name: &str, regtype: &str, domain: &str) -> Result<Self> {
        let fullname = construct_full_name(name, regtype, domain)?;

        Ok(Self {
            name: name.to_string(),
            regtype: normalize_domain(regtype).to_string(),
            domain: normalize_domain(domain).to_string(),
            fullname,
        })
    }

    /// Consumes the identity, returning `(name, regtype, domain)`.
    pub fn into_parts(self) -> (String, String, String) {
        (self.name, self.regtype, self.domain)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullname)
    }
}

/// Constructs the escaped fullname of a service.
///
/// `regtype` (e.g. `_http._tcp`) and `domain` (e.g. `local`) are label sequences that are copied
/// as given; a trailing dot is optional on both. Fails with `Error::InvalidName` if any
/// component is malformed or the result would not fit in [`MAX_DOMAIN_NAME`].
pub fn construct_full_name(name: &str, regtype: &str, domain: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::InvalidName("instance name cannot be empty".into()));
    }

    let regtype = normalize_domain(regtype);
    check_regtype(regtype)?;

    let domain = normalize_domain(domain);
    if domain.is_empty() {
        return Err(Error::InvalidName("domain cannot be empty".into()));
    }

    let mut fullname = escape_label(name);
    fullname.reserve(regtype.len() + domain.len() + 3);
    fullname.push('.');
    fullname.push_str(regtype);
    fullname.push('.');
    fullname.push_str(domain);
    fullname.push('.');

    if fullname.len() >= MAX_DOMAIN_NAME {
        return Err(Error::InvalidName(format!(
            "fullname is {} bytes, limit is {}",
            fullname.len(),
            MAX_DOMAIN_NAME - 1
        )));
    }

    Ok(fullname)
}

/// Constructs the fullname of a service according to `mode`.
///
/// With [`FullNameMode::BestEffort`] an unencodable identity produces the naive concatenation
/// `name + regtype + domain` instead of an error.
pub fn create_full_name(
    name: &str,
    regtype: &str,
    domain: &str,
    mode: FullNameMode,
) -> Result<String> {
    match (construct_full_name(name, regtype, domain), mode) {
        (Ok(fullname), _) => Ok(fullname),
        (Err(e), FullNameMode::Strict) => Err(e),
        (Err(e), FullNameMode::BestEffort) => {
            warn!("could not construct full service name ({}), joining components", e);
            Ok(format!("{name}{regtype}{domain}"))
        }
    }
}

/// Splits an escaped fullname into its instance name, registration type and domain.
///
/// The first label is unescaped into the instance name, the next two form the registration type
/// and every remaining label forms the domain. Neither the registration type nor the domain
/// carry a trailing dot.
pub fn split_full_name(fullname: &str) -> Result<ServiceIdentity> {
    let labels = split_labels(fullname)?;

    if labels.len() < 4 {
        return Err(Error::InvalidName(format!(
            "expected at least 4 labels in `{}`, found {}",
            fullname,
            labels.len()
        )));
    }

    let name = unescape_label(labels[0])?;
    let regtype = labels[1..3].join(".");
    let domain = labels[3..].join(".");

    let mut canonical = fullname.to_string();
    if !ends_with_unescaped_dot(&canonical) {
        canonical.push('.');
    }

    Ok(ServiceIdentity {
        name,
        regtype,
        domain,
        fullname: canonical,
    })
}

/// Normalizes the specified domain `&str` to conform to a standard enforced by this crate.
///
/// Daemons suffix domains with a final `'.'` character in some contexts but it is not required
/// by the standard. This function removes the final unescaped dot if present.
pub fn normalize_domain(domain: &str) -> &str {
    if ends_with_unescaped_dot(domain) {
        &domain[..domain.len() - 1]
    } else {
        domain
    }
}

/// Escapes a single label: `.` and `\` get a backslash prefix, control characters, space and
/// DEL become `\DDD`.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len() + 8);

    for c in label.chars() {
        match c {
            '.' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) <= 0x20 || c as u32 == 0x7f => {
                // writing to a String cannot fail
                let _ = write!(out, "\\{:03}", c as u32);
            }
            c => out.push(c),
        }
    }

    out
}

/// Reverses [`escape_label()`].
pub fn unescape_label(label: &str) -> Result<String> {
    let bytes = label.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        let next = *bytes
            .get(i + 1)
            .ok_or_else(|| Error::InvalidName(format!("dangling escape in `{label}`")))?;

        if next.is_ascii_digit() {
            let digits = bytes
                .get(i + 1..i + 4)
                .filter(|d| d.iter().all(u8::is_ascii_digit))
                .ok_or_else(|| Error::InvalidName(format!("bad decimal escape in `{label}`")))?;

            let value = digits
                .iter()
                .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));

            let value = u8::try_from(value).map_err(|_| {
                Error::InvalidName(format!("decimal escape out of range in `{label}`"))
            })?;

            out.push(value);
            i += 4;
        } else {
            out.push(next);
            i += 2;
        }
    }

    String::from_utf8(out)
        .map_err(|_| Error::InvalidName(format!("`{label}` does not decode to UTF-8")))
}

/// Splits a presentation-format domain name on unescaped dots. A single trailing dot is dropped.
fn split_labels(fullname: &str) -> Result<Vec<&str>> {
    let bytes = fullname.as_bytes();
    let mut labels = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'.' => {
                if i == start {
                    return Err(Error::InvalidName(format!("empty label in `{fullname}`")));
                }
                labels.push(&fullname[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    if i > bytes.len() {
        return Err(Error::InvalidName(format!(
            "dangling escape in `{fullname}`"
        )));
    }

    if start < bytes.len() {
        labels.push(&fullname[start..]);
    }

    Ok(labels)
}

fn ends_with_unescaped_dot(s: &str) -> bool {
    let Some(rest) = s.strip_suffix('.') else {
        return false;
    };
    let backslashes = rest.bytes().rev().take_while(|&b| b == b'\\').count();
    backslashes % 2 == 0
}

fn check_regtype(regtype: &str) -> Result<()> {
    // shortest valid form is "x._tcp"
    if regtype.len() < 6 {
        return Err(Error::InvalidName(format!(
            "registration type `{regtype}` is too short"
        )));
    }

    let transport = &regtype.as_bytes()[regtype.len() - 4..];
    if !transport.eq_ignore_ascii_case(b"_tcp") && !transport.eq_ignore_ascii_case(b"_udp") {
        return Err(Error::InvalidName(format!(
            "registration type `{regtype}` must end in `_tcp` or `_udp`"
        )));
    }

    Ok(())
}
