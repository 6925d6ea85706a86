//! Raw-to-normalized input translation helpers.
//!
//! These are the pure parts of the libinput drain loop: timestamp
//! normalization, seat-wide button de-duplication, and the expansion of a
//! scroll sample into axis events plus its closing frame.

use crate::events::{AxisEvent, AxisSource, PointerEvent, ScrollAxis};

/// Timestamps are reported in microseconds; events carry whole milliseconds.
pub(crate) fn usec_to_msec(usec: u64) -> u32 {
    (usec / 1000) as u32
}

/// A press is only real when this transition made the seat-wide pressed
/// count 1, a release when it made it 0. Anything else was already
/// accounted for by another device sharing the seat.
pub(crate) fn button_transition_expected(pressed: bool, seat_count: u32) -> bool {
    if pressed {
        seat_count == 1
    } else {
        seat_count == 0
    }
}

/// One axis of a scroll sample.
pub(crate) struct AxisValue {
    pub delta: f64,
    /// v120 step value, present only for wheel-sourced scrolls.
    pub v120: Option<i32>,
}

/// One decoded scroll sample, up to two axes.
pub(crate) struct ScrollSample {
    pub time_ms: u32,
    pub source: AxisSource,
    /// Natural scrolling enabled on the emitting device.
    pub inverted: bool,
    pub vertical: Option<AxisValue>,
    pub horizontal: Option<AxisValue>,
}

/// Expands one scroll sample into its axis events followed by the single
/// frame that closes the batch. The frame is emitted even for a sample
/// with no matching axes.
pub(crate) fn scroll_events(sample: &ScrollSample) -> Vec<PointerEvent> {
    let mut events = Vec::with_capacity(3);

    let axes = [
        (ScrollAxis::Vertical, &sample.vertical),
        (ScrollAxis::Horizontal, &sample.horizontal),
    ];
    for (axis, value) in axes {
        let Some(value) = value else { continue };
        events.push(PointerEvent::Axis(AxisEvent {
            time_ms: sample.time_ms,
            source: sample.source,
            axis,
            delta: value.delta,
            discrete: value.v120,
            inverted: sample.inverted,
        }));
    }

    events.push(PointerEvent::Frame);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel_sample(vertical: Option<AxisValue>, horizontal: Option<AxisValue>) -> ScrollSample {
        ScrollSample {
            time_ms: 1000,
            source: AxisSource::Wheel,
            inverted: false,
            vertical,
            horizontal,
        }
    }

    #[test]
    fn usec_truncates_to_whole_milliseconds() {
        assert_eq!(usec_to_msec(0), 0);
        assert_eq!(usec_to_msec(999), 0);
        assert_eq!(usec_to_msec(1000), 1);
        assert_eq!(usec_to_msec(1_234_567), 1234);
    }

    #[test]
    fn button_gating_truth_table() {
        assert!(button_transition_expected(true, 1));
        assert!(!button_transition_expected(true, 0));
        assert!(!button_transition_expected(true, 2));
        assert!(button_transition_expected(false, 0));
        assert!(!button_transition_expected(false, 1));
        assert!(!button_transition_expected(false, 3));
    }

    #[test]
    fn wheel_scroll_carries_discrete_value() {
        let sample = wheel_sample(
            Some(AxisValue {
                delta: 15.0,
                v120: Some(120),
            }),
            None,
        );
        let events = scroll_events(&sample);
        assert_eq!(
            events,
            vec![
                PointerEvent::Axis(AxisEvent {
                    time_ms: 1000,
                    source: AxisSource::Wheel,
                    axis: ScrollAxis::Vertical,
                    delta: 15.0,
                    discrete: Some(120),
                    inverted: false,
                }),
                PointerEvent::Frame,
            ]
        );
    }

    #[test]
    fn one_frame_follows_all_axes() {
        let sample = wheel_sample(
            Some(AxisValue {
                delta: -15.0,
                v120: Some(-120),
            }),
            Some(AxisValue {
                delta: 30.0,
                v120: Some(240),
            }),
        );
        let events = scroll_events(&sample);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], PointerEvent::Axis(_)));
        assert!(matches!(events[1], PointerEvent::Axis(_)));
        assert_eq!(events[2], PointerEvent::Frame);
    }

    #[test]
    fn finger_scroll_has_no_discrete_value() {
        let sample = ScrollSample {
            time_ms: 7,
            source: AxisSource::Finger,
            inverted: true,
            vertical: Some(AxisValue {
                delta: 2.5,
                v120: None,
            }),
            horizontal: None,
        };
        let events = scroll_events(&sample);
        let PointerEvent::Axis(axis) = events[0] else {
            panic!("expected an axis event");
        };
        assert_eq!(axis.source, AxisSource::Finger);
        assert_eq!(axis.discrete, None);
        assert!(axis.inverted);
    }

    #[test]
    fn empty_sample_still_closes_with_a_frame() {
        let events = scroll_events(&wheel_sample(None, None));
        assert_eq!(events, vec![PointerEvent::Frame]);
    }
}
