//! Event interest mask.
//!
//! The design names an event-driven I/O multiplexer with a bitwise-OR interest
//! mask over {readable, writable, error, hangup}. Under tokio this maps onto
//! implicit task wakeups rather than an explicit registration table, so
//! [`EventMask`] is kept only for the diagnostics/logging vocabulary the
//! design specifies, not as a dispatch mechanism.

/// Bitwise-OR-able interest mask, named after the four conditions the design
/// calls out explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const IN: EventMask = EventMask(1 << 0);
    pub const OUT: EventMask = EventMask(1 << 1);
    pub const ERR: EventMask = EventMask(1 << 2);
    pub const HUP: EventMask = EventMask(1 << 3);

    /// Returns true if `self` contains every bit set in `other`.
    #[must_use]
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Renders the mask as a `|`-joined list of set flag names, independent of
    /// the underlying bit values (§8: `event_mask_str(IN|OUT) = "POLLIN|POLLOUT"`).
    #[must_use]
    pub fn describe(self) -> String {
        const NAMED: &[(EventMask, &str)] = &[
            (EventMask::IN, "POLLIN"),
            (EventMask::OUT, "POLLOUT"),
            (EventMask::ERR, "POLLERR"),
            (EventMask::HUP, "POLLHUP"),
        ];
        NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_is_independent_of_bit_values() {
        assert_eq!(
            (EventMask::IN | EventMask::OUT).describe(),
            "POLLIN|POLLOUT"
        );
    }

    #[test]
    fn describe_empty_mask() {
        assert_eq!(EventMask::default().describe(), "");
    }

    #[test]
    fn contains_checks_all_bits() {
        let mask = EventMask::IN | EventMask::ERR;
        assert!(mask.contains(EventMask::IN));
        assert!(!mask.contains(EventMask::OUT));
    }
}
