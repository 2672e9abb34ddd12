//! Three-valued conditions over net-communication values.

use std::fmt;

use rcc_net::{NetHandle, NetStatus};

/// Truth value of a condition. `Unknown` means the inputs are not yet
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn negate(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

/// Immutable boolean expression, recomputed on every evaluation.
#[derive(Clone)]
pub enum Condition {
    True,
    False,
    /// `False` as soon as one child is false, `True` if all are true.
    And(Vec<Condition>),
    /// `True` as soon as one child is true, `False` if all are false.
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Boolean netcomm value published by a net under `key`.
    NetResult { net: NetHandle, key: String },
    /// Whether a net currently has the given status.
    NetStatusIs { net: NetHandle, status: NetStatus },
}

impl Condition {
    pub fn all(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(children.into_iter().collect())
    }

    pub fn any(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(children.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    pub fn net_result(net: &NetHandle, key: impl Into<String>) -> Self {
        Condition::NetResult {
            net: net.clone(),
            key: key.into(),
        }
    }

    pub fn net_status_is(net: &NetHandle, status: NetStatus) -> Self {
        Condition::NetStatusIs {
            net: net.clone(),
            status,
        }
    }

    pub fn evaluate(&self) -> Truth {
        match self {
            Condition::True => Truth::True,
            Condition::False => Truth::False,
            Condition::And(children) => {
                let mut acc = Truth::True;
                for child in children {
                    match child.evaluate() {
                        Truth::False => return Truth::False,
                        t => acc = acc.and(t),
                    }
                }
                acc
            }
            Condition::Or(children) => {
                let mut acc = Truth::False;
                for child in children {
                    match child.evaluate() {
                        Truth::True => return Truth::True,
                        t => acc = acc.or(t),
                    }
                }
                acc
            }
            Condition::Not(inner) => inner.evaluate().negate(),
            Condition::NetResult { net, key } => match net.netcomm(key) {
                Some(v) => match v.value.trim() {
                    "true" => Truth::True,
                    "false" => Truth::False,
                    _ => Truth::Unknown,
                },
                None => Truth::Unknown,
            },
            Condition::NetStatusIs { net, status } => Truth::from_bool(net.status() == *status),
        }
    }

    pub fn is_true(&self) -> bool {
        self.evaluate().is_true()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => f.write_str("TRUE"),
            Condition::False => f.write_str("FALSE"),
            Condition::And(children) => f.debug_tuple("AND").field(children).finish(),
            Condition::Or(children) => f.debug_tuple("OR").field(children).finish(),
            Condition::Not(inner) => f.debug_tuple("NOT").field(inner).finish(),
            Condition::NetResult { net, key } => write!(f, "{}.{}", net.name(), key),
            Condition::NetStatusIs { net, status } => write!(f, "{} is {}", net.name(), status),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rcc_core::{DeviceRegistry, Notifier};
    use rcc_graph::Fragment;
    use rcc_net::{Net, NetConfig};

    use super::*;

    pub(super) fn silent_net() -> NetHandle {
        Net::load(
            Fragment::new("root"),
            Arc::new(DeviceRegistry::new()),
            NetConfig::new("silent", Duration::from_millis(10)),
            Notifier::spawn("test-notify").unwrap(),
        )
        .unwrap()
    }

    pub(super) fn leaf(t: Truth, net: &NetHandle) -> Condition {
        match t {
            Truth::True => Condition::True,
            Truth::False => Condition::False,
            Truth::Unknown => Condition::net_result(net, "missing"),
        }
    }

    #[test]
    fn and_short_circuits_and_waits_for_unknown() {
        let net = silent_net();
        let and = |a, b| Condition::all([leaf(a, &net), leaf(b, &net)]).evaluate();
        assert_eq!(and(Truth::Unknown, Truth::True), Truth::Unknown);
        assert_eq!(and(Truth::False, Truth::Unknown), Truth::False);
        assert_eq!(and(Truth::True, Truth::True), Truth::True);
    }

    #[test]
    fn or_and_not_are_three_valued() {
        let net = silent_net();
        let unknown = Condition::net_result(&net, "missing");
        assert_eq!(
            Condition::any([unknown.clone(), Condition::True]).evaluate(),
            Truth::True
        );
        assert_eq!(
            Condition::any([unknown.clone(), Condition::False]).evaluate(),
            Truth::Unknown
        );
        assert_eq!(unknown.clone().negate().evaluate(), Truth::Unknown);
        assert_eq!(Condition::False.negate().evaluate(), Truth::True);
        assert_eq!(Condition::all([]).evaluate(), Truth::True);
        assert_eq!(Condition::any([]).evaluate(), Truth::False);
    }

    #[test]
    fn status_leaf_tracks_net() {
        let net = silent_net();
        let ready = Condition::net_status_is(&net, NetStatus::Ready);
        assert!(ready.is_true());
        net.cancel();
        assert_eq!(ready.evaluate(), Truth::False);
    }

    #[test]
    fn debug_names_leaves() {
        let net = silent_net();
        let cond = Condition::all([Condition::True, Condition::net_result(&net, "done")]);
        assert_eq!(format!("{cond:?}"), "AND([TRUE, silent.done])");
    }
}
