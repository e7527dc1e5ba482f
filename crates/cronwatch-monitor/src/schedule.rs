//! Expected-occurrence math for job schedules.
//!
//! Weeks start on Monday 00:00. A monthly day past the end of the month
//! rolls into the following month.

use chrono::{DateTime, Datelike, Duration, TimeZone};

use cronwatch_types::{PeriodGroup, Schedule};

/// Start of the day, week or month containing `now`, in `now`'s time zone.
pub fn period_start<Tz: TimeZone>(group: PeriodGroup, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let date = now.date_naive();
    let first_day = match group {
        PeriodGroup::Daily => date,
        PeriodGroup::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
        PeriodGroup::Monthly => date.with_day(1)?,
    };
    first_day
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(now.timezone())
        .earliest()
}

/// The occurrence of `schedule` anchored in the period containing `now`.
///
/// Returns `None` when the schedule is not well formed or the occurrence
/// falls outside the representable range.
pub fn expected_occurrence<Tz: TimeZone>(
    schedule: &Schedule,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    if !schedule.is_well_formed() {
        return None;
    }
    let group = schedule.period_group?;
    let hour = schedule.period_hour?;
    let min = schedule.period_min?;
    let day_offset = match group {
        PeriodGroup::Daily => 0,
        PeriodGroup::Weekly => schedule.period_dweek?,
        PeriodGroup::Monthly => schedule.period_dmon?.checked_sub(1)?,
    };
    period_start(group, now)?
        .checked_add_signed(Duration::try_days(day_offset.into())?)?
        .checked_add_signed(Duration::try_hours(hour.into())?)?
        .checked_add_signed(Duration::try_minutes(min.into())?)
}

/// Allowed delay before a missing heartbeat counts as a miss.
pub fn grace_period(group: Option<PeriodGroup>) -> Duration {
    match group {
        Some(PeriodGroup::Daily) => Duration::hours(1),
        Some(PeriodGroup::Weekly) => Duration::hours(3),
        Some(PeriodGroup::Monthly) => Duration::hours(6),
        None => Duration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_same_result_all_day() {
        let schedule = Schedule::daily(4, 15);
        for hour in [0, 3, 4, 12, 23] {
            let now = utc(2024, 5, 8, hour, 59);
            assert_eq!(
                expected_occurrence(&schedule, &now),
                Some(utc(2024, 5, 8, 4, 15)),
                "called at {now}"
            );
        }
    }

    #[test]
    fn test_weekly_starts_monday() {
        // 2024-05-06 is a Monday, 2024-05-12 the following Sunday.
        let schedule = Schedule::weekly(2, 9, 0);
        let expected = Some(utc(2024, 5, 8, 9, 0));
        assert_eq!(expected_occurrence(&schedule, &utc(2024, 5, 6, 0, 0)), expected);
        assert_eq!(expected_occurrence(&schedule, &utc(2024, 5, 10, 17, 30)), expected);
        assert_eq!(expected_occurrence(&schedule, &utc(2024, 5, 12, 23, 59)), expected);
        assert_eq!(
            expected_occurrence(&schedule, &utc(2024, 5, 13, 0, 0)),
            Some(utc(2024, 5, 15, 9, 0))
        );
    }

    #[test]
    fn test_weekly_on_monday_and_sunday() {
        let now = utc(2024, 5, 9, 12, 0);
        assert_eq!(
            expected_occurrence(&Schedule::weekly(0, 1, 2), &now),
            Some(utc(2024, 5, 6, 1, 2))
        );
        assert_eq!(
            expected_occurrence(&Schedule::weekly(6, 1, 2), &now),
            Some(utc(2024, 5, 12, 1, 2))
        );
    }

    #[test]
    fn test_monthly() {
        let schedule = Schedule::monthly(15, 6, 30);
        assert_eq!(
            expected_occurrence(&schedule, &utc(2024, 5, 1, 0, 0)),
            Some(utc(2024, 5, 15, 6, 30))
        );
        assert_eq!(
            expected_occurrence(&schedule, &utc(2024, 5, 31, 23, 0)),
            Some(utc(2024, 5, 15, 6, 30))
        );
    }

    #[test]
    fn test_monthly_past_month_end_rolls_over() {
        let schedule = Schedule::monthly(31, 0, 0);
        assert_eq!(
            expected_occurrence(&schedule, &utc(2024, 2, 10, 0, 0)),
            Some(utc(2024, 3, 2, 0, 0))
        );
    }

    #[test]
    fn test_unevaluable_schedules() {
        let now = utc(2024, 5, 8, 12, 0);
        assert_eq!(expected_occurrence(&Schedule::default(), &now), None);

        let no_dweek = Schedule {
            period_dweek: None,
            ..Schedule::weekly(1, 0, 0)
        };
        assert_eq!(expected_occurrence(&no_dweek, &now), None);

        let zero_dmon = Schedule::monthly(0, 0, 0);
        assert_eq!(expected_occurrence(&zero_dmon, &now), None);

        let no_hour = Schedule {
            period_hour: None,
            ..Schedule::daily(1, 0)
        };
        assert_eq!(expected_occurrence(&no_hour, &now), None);
    }

    #[test]
    fn test_out_of_range_fields_are_unevaluable() {
        let now = utc(2024, 5, 8, 12, 0);
        assert_eq!(expected_occurrence(&Schedule::weekly(u32::MAX, 0, 0), &now), None);
        assert_eq!(expected_occurrence(&Schedule::monthly(u32::MAX, 0, 0), &now), None);
        assert_eq!(expected_occurrence(&Schedule::daily(u32::MAX, 0), &now), None);
        assert_eq!(expected_occurrence(&Schedule::daily(24, 0), &now), None);
        assert_eq!(expected_occurrence(&Schedule::daily(0, 60), &now), None);
    }

    #[test]
    fn test_calendar_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        // 2024-05-08 20:00 UTC is already 2024-05-09 in Tokyo.
        let now = utc(2024, 5, 8, 20, 0).with_timezone(&tokyo);
        let expected = expected_occurrence(&Schedule::daily(3, 0), &now).unwrap();
        assert_eq!(expected.with_timezone(&Utc), utc(2024, 5, 8, 18, 0));
    }

    #[test]
    fn test_period_start() {
        let now = utc(2024, 5, 9, 13, 45);
        assert_eq!(period_start(PeriodGroup::Daily, &now), Some(utc(2024, 5, 9, 0, 0)));
        assert_eq!(period_start(PeriodGroup::Weekly, &now), Some(utc(2024, 5, 6, 0, 0)));
        assert_eq!(period_start(PeriodGroup::Monthly, &now), Some(utc(2024, 5, 1, 0, 0)));
    }

    #[test]
    fn test_grace_table() {
        assert_eq!(grace_period(Some(PeriodGroup::Daily)), Duration::minutes(60));
        assert_eq!(grace_period(Some(PeriodGroup::Weekly)), Duration::minutes(180));
        assert_eq!(grace_period(Some(PeriodGroup::Monthly)), Duration::minutes(360));
        assert_eq!(grace_period(None), Duration::minutes(60));
    }
}
