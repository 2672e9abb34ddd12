//! Port value types.
//!
//! Every value carried by a port or parameter implements [`PortValue`], which
//! gives it a canonical text form. The text form is what net-communication,
//! `eval()` results and fragment descriptions exchange.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A value that can flow through ports and parameters.
pub trait PortValue: Clone + Send + Sync + fmt::Debug + 'static {
    /// Render the value in its canonical text form.
    fn render(&self) -> String;

    /// Parse a value from its canonical text form.
    fn parse(text: &str) -> CoreResult<Self>;

    /// Human-readable type name used in error messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn parse_error<T: PortValue>(input: &str) -> CoreError {
    CoreError::Parse {
        input: input.to_string(),
        expected: T::type_name().to_string(),
    }
}

macro_rules! scalar_port_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PortValue for $ty {
                fn render(&self) -> String {
                    self.to_string()
                }

                fn parse(text: &str) -> CoreResult<Self> {
                    text.trim().parse::<$ty>().map_err(|_| parse_error::<$ty>(text))
                }
            }
        )*
    };
}

scalar_port_value!(bool, i32, i64, u32, u64, f32, f64);

impl PortValue for String {
    fn render(&self) -> String {
        self.clone()
    }

    fn parse(text: &str) -> CoreResult<Self> {
        Ok(text.to_string())
    }

    fn type_name() -> &'static str {
        "String"
    }
}

/// Vectors render as `[a, b, c]`.
impl<T: PortValue> PortValue for Vec<T> {
    fn render(&self) -> String {
        let items: Vec<String> = self.iter().map(PortValue::render).collect();
        format!("[{}]", items.join(", "))
    }

    fn parse(text: &str) -> CoreResult<Self> {
        let inner = text
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| parse_error::<Self>(text))?;
        if inner.trim().is_empty() {
            return Ok(Vec::new());
        }
        inner.split(',').map(T::parse).collect()
    }
}
