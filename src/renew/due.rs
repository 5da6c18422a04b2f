use time::OffsetDateTime;

use crate::{plugins::RunLevel, renewal::Renewal, settings::Settings};

/// Whether `renewal` should run now.
///
/// Failed runs are retried right away; only a success holds the renewal off for its period.
pub fn is_due(
    renewal: &Renewal,
    settings: &Settings,
    run_level: RunLevel,
    now: OffsetDateTime,
) -> bool {
    if run_level.force || renewal.new || renewal.updated {
        return true;
    }

    if renewal.last_result().map_or(true, |result| !result.success) {
        return true;
    }

    match renewal.next_due(settings) {
        Some(due) => due <= now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, Duration};

    use super::*;
    use crate::{
        plugins::{target::TargetOptions, validation::ValidationOptions},
        renewal::{OrderResult, RenewResult},
    };

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn renewal() -> Renewal {
        let mut renewal = Renewal::new(
            TargetOptions::Manual {
                common_name: None,
                hosts: vec!["example.com".to_owned()],
            },
            ValidationOptions::FileSystem { path: None },
        );
        renewal.new = false;
        renewal.custom_renewal_days = Some(60);
        renewal
    }

    fn success(date: OffsetDateTime) -> RenewResult {
        let mut order = OrderResult::new("example.com");
        order.success = true;
        RenewResult::from_orders(date, vec![order])
    }

    #[test]
    fn new_renewals_are_due() {
        let mut renewal = renewal();
        renewal.new = true;

        assert!(is_due(&renewal, &Settings::default(), RunLevel::SIMPLE, NOW));
    }

    #[test]
    fn failures_are_retried_immediately() {
        let mut renewal = renewal();
        renewal.history.push(success(NOW - Duration::days(20)));
        renewal
            .history
            .push(RenewResult::failure(NOW - Duration::days(3), "dns-01 failed"));

        assert!(is_due(&renewal, &Settings::default(), RunLevel::SIMPLE, NOW));
    }

    #[test]
    fn recent_success_waits_for_period() {
        let mut renewal = renewal();
        renewal.history.push(success(NOW - Duration::days(3)));
        let settings = Settings::default();

        assert!(!is_due(&renewal, &settings, RunLevel::SIMPLE, NOW));
        assert!(!is_due(&renewal, &settings, RunLevel::UNATTENDED, NOW));
        assert!(is_due(&renewal, &settings, RunLevel::SIMPLE.forced(), NOW));

        assert!(is_due(
            &renewal,
            &settings,
            RunLevel::UNATTENDED,
            NOW + Duration::days(57)
        ));
    }

    #[test]
    fn updated_options_run_again() {
        let mut renewal = renewal();
        renewal.history.push(success(NOW - Duration::days(3)));
        renewal.updated = true;

        assert!(is_due(&renewal, &Settings::default(), RunLevel::UNATTENDED, NOW));
    }
}
