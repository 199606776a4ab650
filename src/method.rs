//! HTTP method as a typed enum.
//!
//! Only the methods a REST resource can answer are listed. Anything else is
//! answered with `405 Method Not Allowed` before it reaches a resource.

use std::fmt;
use std::str::FromStr;

use crate::model::Action;

/// A method a resource may serve.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Method {
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
        }
    }

    /// The model action this method invokes.
    ///
    /// HEAD reads like GET; PATCH and OPTIONS have no model action.
    pub fn action(self) -> Option<Action> {
        match self {
            Self::Get | Self::Head => Some(Action::Read),
            Self::Put              => Some(Action::Write),
            Self::Delete           => Some(Action::Delete),
            Self::Post             => Some(Action::Make),
            Self::Patch | Self::Options => None,
        }
    }

    /// Whether requests with this method carry input for the model.
    pub fn has_input(self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

/// Parses a method name. Accepts any case; the wire form is uppercase.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            _         => Err(()),
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = ();

    fn try_from(m: &http::Method) -> Result<Self, Self::Error> {
        m.as_str().parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_names() {
        assert_eq!("delete".parse::<Method>(), Ok(Method::Delete));
        assert!("PURGE".parse::<Method>().is_err());
    }

    #[test]
    fn head_reads() {
        assert_eq!(Method::Head.action(), Some(Action::Read));
        assert!(Method::Post.has_input());
        assert!(!Method::Delete.has_input());
    }
}
