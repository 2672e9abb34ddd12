//! Named, typed configuration values of a primitive.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rcc_core::PortValue;

use crate::error::{GraphError, GraphResult};

struct ParamShared<T> {
    name: String,
    value: Mutex<T>,
}

/// A parameter handle. Clones refer to the same parameter.
pub struct Parameter<T: PortValue> {
    shared: Arc<ParamShared<T>>,
}

impl<T: PortValue> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PortValue> Parameter<T> {
    pub(crate) fn new(name: &str, default: T) -> Self {
        Self {
            shared: Arc::new(ParamShared {
                name: name.to_string(),
                value: Mutex::new(default),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn get(&self) -> T {
        self.shared.value.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.shared.value.lock() = value;
    }
}

impl<T: PortValue> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.shared.name)
            .field("value", &self.get())
            .finish()
    }
}

/// Type-erased view of a parameter, used when applying text descriptions.
pub trait AnyParameter: Send + Sync {
    fn name(&self) -> &str;
    fn value_type(&self) -> &'static str;
    fn render(&self) -> String;
    /// Parse and store a value from its text form.
    fn set_text(&self, text: &str) -> GraphResult<()>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PortValue> AnyParameter for Parameter<T> {
    fn name(&self) -> &str {
        Parameter::name(self)
    }

    fn value_type(&self) -> &'static str {
        T::type_name()
    }

    fn render(&self) -> String {
        self.get().render()
    }

    fn set_text(&self, text: &str) -> GraphResult<()> {
        let value = T::parse(text).map_err(|source| GraphError::InvalidParameter {
            parameter: self.shared.name.clone(),
            source,
        })?;
        self.set(value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_text_parses_value() {
        let p = Parameter::new("gain", 1.0_f64);
        p.set_text("2.5").unwrap();
        assert_eq!(p.get(), 2.5);
        assert_eq!(AnyParameter::render(&p), "2.5");
    }

    #[test]
    fn set_text_rejects_garbage() {
        let p = Parameter::new("cycles", 3_u64);
        let err = p.set_text("many").unwrap_err();
        assert!(matches!(err, GraphError::InvalidParameter { .. }));
        assert_eq!(p.get(), 3);
    }

    #[test]
    fn clones_share_value() {
        let p = Parameter::new("name", String::from("a"));
        let q = p.clone();
        q.set("b".to_string());
        assert_eq!(p.get(), "b");
    }
}
