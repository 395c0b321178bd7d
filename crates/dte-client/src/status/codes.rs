//! Shared pieces of the response taxonomies
//!
//! Every query operation may answer with a negative service error instead
//! of one of its own codes. `-11` is an umbrella whose meaning lives in
//! three sub-codes of the response header.

use dte_core::Element;

/// Umbrella service error carrying sub-codes
pub const COMPOSITE_ERROR_CODE: i32 = -11;

/// Service code for a response header without `ESTADO`
pub const MISSING_STATUS_CODE: &str = "-1";

/// `ESTADO` of a response header, or [`MISSING_STATUS_CODE`] when absent
pub fn header_status(header: &Element) -> String {
    header
        .child_text("ESTADO")
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| MISSING_STATUS_CODE.to_string())
}

/// Description for a code outside the documented set
pub fn unknown_description(code: &str) -> String {
    format!("unknown error code #{}", code)
}

/// Sub-codes of a `-11` response; any of them may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeError {
    pub srv_code: Option<String>,
    pub sql_code: Option<String>,
    pub err_code: Option<String>,
}

impl CompositeError {
    pub fn from_header(header: &Element) -> Self {
        let sub_code = |name: &str| {
            header
                .find(name)
                .map(|e| e.text().trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            srv_code: sub_code("SRV_CODE"),
            sql_code: sub_code("SQL_CODE"),
            err_code: sub_code("ERR_CODE"),
        }
    }

    pub fn description(&self) -> String {
        let parts: Vec<String> = [
            ("SRV_CODE", &self.srv_code),
            ("SQL_CODE", &self.sql_code),
            ("ERR_CODE", &self.err_code),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{} {}", name, v)))
        .collect();

        if parts.is_empty() {
            "internal service error".to_string()
        } else {
            format!("internal service error ({})", parts.join(", "))
        }
    }
}

/// Negative code shared by all query operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: i32,
    /// Present only for [`COMPOSITE_ERROR_CODE`]
    pub composite: Option<CompositeError>,
}

impl ServiceError {
    /// `None` unless `code` is a negative integer
    pub fn parse(code: &str, header: Option<&Element>) -> Option<Self> {
        let code: i32 = code.trim().parse().ok().filter(|n: &i32| *n < 0)?;
        let composite = (code == COMPOSITE_ERROR_CODE)
            .then(|| header.map(CompositeError::from_header).unwrap_or_default());
        Some(Self { code, composite })
    }

    pub fn description(&self) -> String {
        if let Some(composite) = &self.composite {
            return composite.description();
        }
        match self.code {
            -1 => "status field missing from response",
            -2 => "service returned an error",
            -3 => "user does not exist",
            -4 => "error retrieving data",
            -5 => "error returning data",
            -6 => "user not authorized",
            -7 | -8 | -9 => "error returning data",
            -10 => "error validating user id",
            -12 => "error returning query",
            -13 => "user id is empty",
            -14 => "error building response XML",
            code => return unknown_description(&code.to_string()),
        }
        .to_string()
    }
}

/// Declares a closed status-code set for one remote operation
///
/// Each listed code maps to a description plus its error and terminal
/// classification. Negative numeric codes become `Service`, anything else
/// `Unknown`; both count as terminal errors.
macro_rules! taxonomy {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal => $description:literal, error: $error:literal, terminal: $terminal:literal;
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
            /// Negative service error
            Service($crate::status::codes::ServiceError),
            /// Code outside the documented set
            Unknown(String),
        }

        impl $name {
            /// Classify a raw code; `header` supplies the `-11` sub-codes
            pub fn from_code(code: &str, header: Option<&dte_core::Element>) -> Self {
                match code.trim() {
                    $( $code => $name::$variant, )+
                    other => match $crate::status::codes::ServiceError::parse(other, header) {
                        Some(service) => $name::Service(service),
                        None => $name::Unknown(other.to_string()),
                    },
                }
            }

            pub fn code(&self) -> String {
                match self {
                    $( $name::$variant => $code.to_string(), )+
                    $name::Service(e) => e.code.to_string(),
                    $name::Unknown(code) => code.clone(),
                }
            }

            pub fn description(&self) -> String {
                match self {
                    $( $name::$variant => $description.to_string(), )+
                    $name::Service(e) => e.description(),
                    $name::Unknown(code) => $crate::status::codes::unknown_description(code),
                }
            }

            pub fn is_error(&self) -> bool {
                match self {
                    $( $name::$variant => $error, )+
                    $name::Service(_) | $name::Unknown(_) => true,
                }
            }

            pub fn is_terminal(&self) -> bool {
                match self {
                    $( $name::$variant => $terminal, )+
                    $name::Service(_) | $name::Unknown(_) => true,
                }
            }
        }
    };
}

pub(crate) use taxonomy;
