// tests/ratelimit/policy_tests.rs

#[cfg(test)]
mod tests {
    use crate::fixtures::{limiter, policies_path};
    use docflow_guard::config::GuardConfig;
    use docflow_guard::ratelimit::{PolicySet, IP, TENANT, USER};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn policy_file_overrides_and_extends_presets() {
        let set = assert_ok!(PolicySet::from_file(policies_path()));

        assert_eq!(set.len(), 5);
        assert_eq!(set.get(TENANT).unwrap().limit, 120);
        assert_eq!(set.get(TENANT).unwrap().window_ms, 60_000);
        assert_eq!(set.get(USER).unwrap().limit, 10);
        assert_eq!(set.get(IP).unwrap().limit, 100);

        let upload = set.get("upload").unwrap();
        assert_eq!(upload.scope.as_deref(), Some("upload"));
        assert_eq!(upload.window_ms, 10_000);

        let export = set.get("export").unwrap();
        assert!(export.scope.is_none());
        assert_eq!(export.window_ms, 3_600_000);
    }

    #[test]
    fn unscoped_policy_keys_on_bare_identifier() {
        let set = assert_ok!(PolicySet::from_file(policies_path()));
        let (limiter, _clock) = limiter();

        let export = set.get("export").unwrap();
        assert_ok!(limiter.consume_policy(export, "report-7"));
        assert_eq!(limiter.get_count("report-7"), Some(1));
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        assert_err!(PolicySet::from_file("/nonexistent/docflow-guard/policies.yaml"));
    }

    #[test]
    fn config_points_at_policy_file() {
        let yaml = format!(
            "rate_limiting:\n  policies_path: {}\n  policies:\n    upload:\n      scope: upload\n      limit: 50\n      unit: minute\n",
            policies_path()
        );
        let config = assert_ok!(GuardConfig::from_yaml(&yaml));
        let set = assert_ok!(config.rate_limiting.policy_set());

        // Inline policies win over the file
        assert_eq!(set.get("upload").unwrap().limit, 50);
        assert_eq!(set.get(TENANT).unwrap().limit, 120);
    }

    #[test]
    fn policy_set_serializes_back_to_yaml() {
        let set = PolicySet::default();
        let yaml = serde_yaml::to_string(&set).unwrap();
        let reparsed = assert_ok!(PolicySet::from_yaml(&yaml));
        assert_eq!(reparsed, set);
    }
}
