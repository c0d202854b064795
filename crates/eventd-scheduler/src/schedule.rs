use chrono::{DateTime, Duration, Months, Utc};

use eventd_core::{EventSchedule, EventStatus, IntervalUnit, OnCompletion};

use crate::event::Event;

/// Output of [`compute_next`]; applied to the event by
/// [`Event::apply_schedule_result`] and persisted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResult {
    /// `None` means the event has no more executions.
    pub next_execution: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub no_more_executions: bool,
    pub pending_drop: bool,
}

/// Compute an event's next execution time from its schedule and history.
///
/// Deterministic and side-effect free. The returned time is always `None`
/// or `>= now`: a recurring candidate that fell behind (missed windows
/// while the scheduler was down) is advanced by whole intervals, so missed
/// firings coalesce into one.
pub fn compute_next(event: &Event, now: DateTime<Utc>) -> ScheduleResult {
    // A disabled event is never scheduled, whatever its schedule says.
    if event.status == EventStatus::Disabled {
        return ScheduleResult {
            next_execution: None,
            status: EventStatus::Disabled,
            no_more_executions: event.no_more_executions,
            pending_drop: event.pending_drop,
        };
    }

    match &event.schedule {
        EventSchedule::OneShot { execute_at } => {
            if event.last_executed.is_some() {
                // Already fired its single execution.
                exhausted(event)
            } else {
                still_scheduled(event, *execute_at)
            }
        }
        EventSchedule::Recurring {
            interval_value,
            interval_unit,
            starts,
            ends,
        } => {
            if let Some(e) = ends {
                if now > *e {
                    return exhausted(event);
                }
            }

            if let Some(s) = starts {
                // Before the window opens the next time is `starts` itself;
                // except when an execution already happened exactly at
                // `starts`, which must not be scheduled twice.
                if now < *s || (now == *s && event.last_executed != Some(*s)) {
                    return still_scheduled(event, *s);
                }
            }

            let candidate = match event.last_executed {
                None => match (starts, ends) {
                    // Window opened in the past and the event never ran:
                    // anchor the series to `starts` so its phase is stable
                    // across restarts.
                    (Some(s), None) => advance(*s, now, *interval_value, *interval_unit),
                    _ => Some(now),
                },
                Some(last) => add_interval(last, *interval_value, *interval_unit)
                    .and_then(|base| advance(base, now, *interval_value, *interval_unit)),
            };

            match candidate {
                Some(t) => {
                    if let Some(e) = ends {
                        if t > *e {
                            return exhausted(event);
                        }
                    }
                    still_scheduled(event, t)
                }
                // Interval arithmetic overflowed; malformed schedule data.
                None => defensive_disable(event),
            }
        }
    }
}

/// The event stays enabled with the given next time.
fn still_scheduled(event: &Event, next: DateTime<Utc>) -> ScheduleResult {
    ScheduleResult {
        next_execution: Some(next),
        status: EventStatus::Enabled,
        no_more_executions: false,
        pending_drop: event.pending_drop,
    }
}

/// No more future executions: disable, and flag for catalog deletion when
/// the on-completion policy is DROP.
fn exhausted(event: &Event) -> ScheduleResult {
    ScheduleResult {
        next_execution: None,
        status: EventStatus::Disabled,
        no_more_executions: true,
        pending_drop: event.pending_drop || event.on_completion == OnCompletion::Drop,
    }
}

fn defensive_disable(event: &Event) -> ScheduleResult {
    ScheduleResult {
        next_execution: None,
        status: EventStatus::Disabled,
        no_more_executions: true,
        pending_drop: event.pending_drop,
    }
}

/// `t + value * unit`, `None` on overflow.
fn add_interval(t: DateTime<Utc>, value: u32, unit: IntervalUnit) -> Option<DateTime<Utc>> {
    match fixed_step(value, unit) {
        Some(step) => t.checked_add_signed(step),
        None => t.checked_add_months(Months::new(month_step(value, unit)?)),
    }
}

/// Smallest point of the interval series anchored at `base` that is `>= now`.
fn advance(
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    value: u32,
    unit: IntervalUnit,
) -> Option<DateTime<Utc>> {
    if base >= now {
        return Some(base);
    }
    match fixed_step(value, unit) {
        Some(step) => {
            let step_ms = step.num_milliseconds();
            if step_ms <= 0 {
                return None;
            }
            let behind_ms = (now - base).num_milliseconds();
            let whole = behind_ms / step_ms;
            let mut t = base.checked_add_signed(Duration::milliseconds(whole * step_ms))?;
            while t < now {
                t = t.checked_add_signed(step)?;
            }
            Some(t)
        }
        None => {
            // Calendar units have no fixed length; step one interval at a time.
            let months = Months::new(month_step(value, unit)?);
            let mut t = base;
            while t < now {
                t = t.checked_add_months(months)?;
            }
            Some(t)
        }
    }
}

/// Fixed-length units as a chrono duration. `None` for calendar units.
fn fixed_step(value: u32, unit: IntervalUnit) -> Option<Duration> {
    let v = i64::from(value);
    match unit {
        IntervalUnit::Second => Some(Duration::seconds(v)),
        IntervalUnit::Minute => Some(Duration::minutes(v)),
        IntervalUnit::Hour => Some(Duration::hours(v)),
        IntervalUnit::Day => Some(Duration::days(v)),
        IntervalUnit::Week => Some(Duration::weeks(v)),
        _ => None,
    }
}

/// Calendar units as a month count. `None` when `unit` is not calendar-based
/// or the count overflows.
fn month_step(value: u32, unit: IntervalUnit) -> Option<u32> {
    match unit {
        IntervalUnit::Month => Some(value),
        IntervalUnit::Quarter => value.checked_mul(3),
        IntervalUnit::Year => value.checked_mul(12),
        _ => None,
    }
}
