//! Request boundary: caller identity and print options parsed from a form.

use crate::error::PrintError;
use crate::store::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Highest accepted `copies` value.
pub const MAX_COPIES: u32 = 100;

/// The authenticated caller, supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// IPP `sides` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sides {
    #[default]
    OneSided,
    TwoSidedLongEdge,
    TwoSidedShortEdge,
}

impl Sides {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sides::OneSided => "one-sided",
            Sides::TwoSidedLongEdge => "two-sided-long-edge",
            Sides::TwoSidedShortEdge => "two-sided-short-edge",
        }
    }

    pub fn is_duplex(&self) -> bool {
        !matches!(self, Sides::OneSided)
    }

    /// Lenient parse: anything starting with `two-sided` is duplex, short
    /// edge if it says so, long edge otherwise. Everything else is one-sided.
    pub fn parse(value: &str) -> Self {
        let v = value.trim().to_ascii_lowercase();
        if !v.starts_with("two-sided") {
            Sides::OneSided
        } else if v.contains("short") {
            Sides::TwoSidedShortEdge
        } else {
            Sides::TwoSidedLongEdge
        }
    }
}

impl fmt::Display for Sides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Print options for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintRequest {
    pub printer: String,
    pub sides: Sides,
    pub color: bool,
    pub copies: u32,
    /// Passed to the backend verbatim.
    pub page_range: Option<String>,
}

impl PrintRequest {
    /// A one-sided, monochrome, single-copy request for `printer`.
    pub fn new(printer: impl Into<String>) -> Self {
        Self {
            printer: printer.into(),
            sides: Sides::OneSided,
            color: false,
            copies: 1,
            page_range: None,
        }
    }

    /// Parse multipart/urlencoded form fields.
    ///
    /// * `printer`: required
    /// * `sides`: IPP keyword; if absent, `duplex=true` means long-edge duplex
    /// * `color`: `true` for colour
    /// * `copies`: 1 to [`MAX_COPIES`], default 1
    /// * `pageRange`: opaque
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, PrintError> {
        let field = |name: &str| form.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let printer = field("printer").ok_or(PrintError::MissingField { field: "printer" })?;

        let sides = match field("sides") {
            Some(s) => Sides::parse(s),
            None if field("duplex") == Some("true") => Sides::TwoSidedLongEdge,
            None => Sides::OneSided,
        };

        let copies = match field("copies") {
            None => 1,
            Some(raw) => parse_copies(raw)?,
        };

        Ok(Self {
            printer: printer.to_string(),
            sides,
            color: parse_color(form),
            copies,
            page_range: field("pageRange").map(str::to_string),
        })
    }

    pub fn is_duplex(&self) -> bool {
        self.sides.is_duplex()
    }

    /// Check a request built in code rather than through [`from_form`].
    ///
    /// [`from_form`]: PrintRequest::from_form
    pub fn validate(&self) -> Result<(), PrintError> {
        if self.printer.trim().is_empty() {
            return Err(PrintError::MissingField { field: "printer" });
        }
        if !(1..=MAX_COPIES).contains(&self.copies) {
            return Err(PrintError::InvalidCopies {
                value: self.copies.to_string(),
                max: MAX_COPIES,
            });
        }
        Ok(())
    }
}

/// `color=true` in a form.
pub fn parse_color(form: &HashMap<String, String>) -> bool {
    form.get("color").map(|v| v.trim()) == Some("true")
}

pub fn parse_copies(raw: &str) -> Result<u32, PrintError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if (1..=MAX_COPIES).contains(&n) => Ok(n),
        _ => Err(PrintError::InvalidCopies {
            value: raw.to_string(),
            max: MAX_COPIES,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn minimal_form() {
        let req = PrintRequest::from_form(&form(&[("printer", "office")])).unwrap();
        assert_eq!(req, PrintRequest::new("office"));
        assert!(!req.is_duplex());
    }

    #[test]
    fn printer_required() {
        let err = PrintRequest::from_form(&form(&[("printer", "  ")])).unwrap_err();
        assert!(matches!(err, PrintError::MissingField { field: "printer" }));
    }

    #[test]
    fn duplex_flag_and_sides() {
        let req = PrintRequest::from_form(&form(&[("printer", "p"), ("duplex", "true")])).unwrap();
        assert_eq!(req.sides, Sides::TwoSidedLongEdge);

        // Explicit sides wins over the duplex flag.
        let req = PrintRequest::from_form(&form(&[
            ("printer", "p"),
            ("duplex", "true"),
            ("sides", "one-sided"),
        ]))
        .unwrap();
        assert_eq!(req.sides, Sides::OneSided);

        assert_eq!(Sides::parse("two-sided-short-edge"), Sides::TwoSidedShortEdge);
        assert_eq!(Sides::parse("TWO-SIDED"), Sides::TwoSidedLongEdge);
        assert_eq!(Sides::parse("sideways"), Sides::OneSided);
    }

    #[test]
    fn copies_bounds() {
        let ok = |v: &str| PrintRequest::from_form(&form(&[("printer", "p"), ("copies", v)]));
        assert_eq!(ok("1").unwrap().copies, 1);
        assert_eq!(ok("100").unwrap().copies, 100);
        for bad in ["0", "101", "-3", "two"] {
            let err = ok(bad).unwrap_err();
            assert!(matches!(err, PrintError::InvalidCopies { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn validate_checks_fields_set_in_code() {
        let mut req = PrintRequest::new("office");
        assert!(req.validate().is_ok());

        for bad in [0, MAX_COPIES + 1] {
            req.copies = bad;
            let err = req.validate().unwrap_err();
            assert!(matches!(err, PrintError::InvalidCopies { max: MAX_COPIES, .. }), "{bad}");
        }

        let err = PrintRequest::new(" ").validate().unwrap_err();
        assert!(matches!(err, PrintError::MissingField { field: "printer" }));
    }

    #[test]
    fn color_and_page_range() {
        let req = PrintRequest::from_form(&form(&[
            ("printer", "p"),
            ("color", "true"),
            ("pageRange", "1-3,7"),
        ]))
        .unwrap();
        assert!(req.color);
        assert_eq!(req.page_range.as_deref(), Some("1-3,7"));

        let req = PrintRequest::from_form(&form(&[("printer", "p"), ("color", "yes")])).unwrap();
        assert!(!req.color);
    }

    #[test]
    fn sides_serialise_as_ipp_keywords() {
        assert_eq!(
            serde_json::to_string(&Sides::TwoSidedLongEdge).unwrap(),
            "\"two-sided-long-edge\""
        );
    }
}
