//! EvalLimits: size and nesting enforcement for rule values.
//!
//! Rule values are owned trees, so a rule that keeps copying a large list
//! into another can exhaust host memory well before its wall-clock budget
//! runs out. Every operation that grows a value asks the limiter first.

use crate::error::{Raise, RaiseResult};
use crate::value::Value;

/// Per-evaluation resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum number of elements in one value, counted recursively.
    /// Also caps string length in bytes.
    max_elements: usize,
    /// Maximum container nesting depth.
    max_depth: usize,
    /// Interpreter steps between deadline checks.
    check_interval: u64,
}

impl EvalLimits {
    pub fn new(max_elements: usize, max_depth: usize) -> Self {
        Self {
            max_elements,
            max_depth,
            check_interval: 256,
        }
    }

    /// Limits with sensible defaults (1M elements, depth 64).
    pub fn with_defaults() -> Self {
        Self::new(1_000_000, 64)
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub(crate) fn check_interval(&self) -> u64 {
        self.check_interval
    }

    /// Deny a collection or string that would hold `len` elements.
    pub(crate) fn check_len(&self, len: usize) -> RaiseResult<()> {
        if len > self.max_elements {
            tracing::warn!(len, limit = self.max_elements, "value growth denied");
            return Err(Raise::Resource(format!(
                "value of {len} elements exceeds the limit of {}",
                self.max_elements
            )));
        }
        Ok(())
    }

    /// Deny `items * times` elements, also counting what nested containers hold.
    pub(crate) fn check_repeat(&self, items: &[Value], times: usize) -> RaiseResult<()> {
        let len = items.len().checked_mul(times).unwrap_or(usize::MAX);
        self.check_len(len)?;
        if times > 0 && items.iter().any(is_container) {
            let per_copy = self.measure_seq(items)?;
            self.check_len(per_copy.checked_mul(times).unwrap_or(usize::MAX))?;
        }
        Ok(())
    }

    /// Check a freshly built or mutated value. Flat values cost O(1); values
    /// holding containers are walked, stopping as soon as a limit is hit.
    pub(crate) fn check_value(&self, value: &Value) -> RaiseResult<()> {
        match value {
            Value::Str(s) => self.check_len(s.len()),
            Value::List(items) | Value::Tuple(items) => {
                self.check_len(items.len())?;
                if items.iter().any(is_container) {
                    self.measure_seq(items)?;
                }
                Ok(())
            }
            Value::Dict(map) => {
                self.check_len(map.len())?;
                if map.values().any(is_container) {
                    let mut m = Measure::default();
                    for v in map.values() {
                        self.measure(v, 1, &mut m)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn measure_seq(&self, items: &[Value]) -> RaiseResult<usize> {
        let mut m = Measure::default();
        for v in items {
            self.measure(v, 1, &mut m)?;
        }
        Ok(m.elements)
    }

    fn measure(&self, value: &Value, depth: usize, m: &mut Measure) -> RaiseResult<()> {
        m.elements += 1;
        if m.elements > self.max_elements {
            return self.check_len(m.elements);
        }
        let children: Box<dyn Iterator<Item = &Value>> = match value {
            Value::List(items) | Value::Tuple(items) => Box::new(items.iter()),
            Value::Dict(map) => Box::new(map.values()),
            _ => return Ok(()),
        };
        if depth >= self.max_depth {
            tracing::warn!(depth, limit = self.max_depth, "value nesting denied");
            return Err(Raise::Resource(format!(
                "values nested deeper than {} levels",
                self.max_depth
            )));
        }
        for child in children {
            self.measure(child, depth + 1, m)?;
        }
        Ok(())
    }
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Default)]
struct Measure {
    elements: usize,
}

pub(crate) fn is_container(v: &Value) -> bool {
    matches!(v, Value::List(_) | Value::Tuple(_) | Value::Dict(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(n: usize) -> Value {
        Value::List(vec![Value::Int(0); n])
    }

    #[test]
    fn allows_values_within_limit() {
        let limits = EvalLimits::new(100, 8);
        assert!(limits.check_value(&list(100)).is_ok());
        assert!(limits.check_value(&Value::from("abc")).is_ok());
    }

    #[test]
    fn denies_long_values() {
        let limits = EvalLimits::new(100, 8);
        assert!(matches!(
            limits.check_value(&list(101)),
            Err(Raise::Resource(_))
        ));
        assert!(limits.check_value(&Value::from("x".repeat(101))).is_err());
    }

    #[test]
    fn counts_nested_elements() {
        let limits = EvalLimits::new(100, 8);
        let nested = Value::List(vec![list(40), list(40), list(40)]);
        assert!(limits.check_value(&nested).is_err());
    }

    #[test]
    fn denies_deep_nesting() {
        let limits = EvalLimits::new(1000, 4);
        let mut v = Value::Int(1);
        for _ in 0..6 {
            v = Value::List(vec![v]);
        }
        assert!(limits.check_value(&v).is_err());
    }

    #[test]
    fn repetition_accounts_for_nested_copies() {
        let limits = EvalLimits::new(1000, 8);
        assert!(limits.check_repeat(&[Value::Int(1)], 1000).is_ok());
        assert!(limits.check_repeat(&[Value::Int(1)], 1001).is_err());
        assert!(limits.check_repeat(&[list(100)], 20).is_err());
        assert!(limits.check_repeat(&[list(100)], 0).is_ok());
    }

    #[test]
    fn defaults_are_reasonable() {
        let limits = EvalLimits::with_defaults();
        assert_eq!(limits.max_elements(), 1_000_000);
        assert_eq!(limits.check_interval(), 256);
    }
}
