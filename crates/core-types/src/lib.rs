use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Shared error type for the policyd crates.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("{message}")]
    Message { message: String },
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde-full", serde(transparent))]
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Directory identifier of a user.
    UserId
);
string_id!(
    /// Directory identifier of a department.
    DepartmentId
);
string_id!(
    /// Identifier of a named network (a set of address ranges).
    NetworkId
);

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AccessorKind {
    User,
    Department,
}

impl AccessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessorKind::User => "user",
            AccessorKind::Department => "department",
        }
    }
}

/// Subject of a policy decision.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Accessor {
    pub id: String,
    #[cfg_attr(feature = "serde-full", serde(rename = "type"))]
    pub kind: AccessorKind,
}

impl Accessor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: AccessorKind::User,
        }
    }

    pub fn department(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: AccessorKind::Department,
        }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Accessor {
    type Err = CoreError;

    /// Parses `user:<id>` or `department:<id>`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| CoreError::new(format!("accessor '{raw}' must be <kind>:<id>")))?;
        if id.is_empty() {
            return Err(CoreError::new(format!("accessor '{raw}' has an empty id")));
        }
        match kind {
            "user" => Ok(Accessor::user(id)),
            "department" | "dept" => Ok(Accessor::department(id)),
            other => Err(CoreError::new(format!("unknown accessor kind '{other}'"))),
        }
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    pub const ALL: [IpFamily; 2] = [IpFamily::Ipv4, IpFamily::Ipv6];

    /// Family of an address; IPv4-mapped IPv6 addresses count as IPv4.
    pub fn of(addr: &IpAddr) -> Self {
        match addr.to_canonical() {
            IpAddr::V4(_) => IpFamily::Ipv4,
            IpAddr::V6(_) => IpFamily::Ipv6,
        }
    }

    /// Key of this family inside the policy document.
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::Ipv4 => "ipv4",
            IpFamily::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client kinds a sign-in can originate from.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ClientKind {
    PcWeb,
    MobileWeb,
    Windows,
    Mac,
    Android,
    Ios,
    Linux,
}

impl ClientKind {
    pub const ALL: [ClientKind; 7] = [
        ClientKind::PcWeb,
        ClientKind::MobileWeb,
        ClientKind::Windows,
        ClientKind::Mac,
        ClientKind::Android,
        ClientKind::Ios,
        ClientKind::Linux,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::PcWeb => "pc_web",
            ClientKind::MobileWeb => "mobile_web",
            ClientKind::Windows => "windows",
            ClientKind::Mac => "mac",
            ClientKind::Android => "android",
            ClientKind::Ios => "ios",
            ClientKind::Linux => "linux",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ClientKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| CoreError::new(format!("unknown client kind '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_parses_kind_prefix() {
        assert_eq!("user:u1".parse::<Accessor>().unwrap(), Accessor::user("u1"));
        assert_eq!(
            "department:d9".parse::<Accessor>().unwrap(),
            Accessor::department("d9")
        );
        assert!("robot:r1".parse::<Accessor>().is_err());
        assert!("user:".parse::<Accessor>().is_err());
    }

    #[test]
    fn mapped_ipv6_counts_as_ipv4() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert_eq!(IpFamily::of(&mapped), IpFamily::Ipv4);
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(IpFamily::of(&v6), IpFamily::Ipv6);
    }

    #[test]
    fn client_kind_rejects_unknown_names() {
        assert_eq!("ios".parse::<ClientKind>().unwrap(), ClientKind::Ios);
        assert!("smart_fridge".parse::<ClientKind>().is_err());
    }
}
