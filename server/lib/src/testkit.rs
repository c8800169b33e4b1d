use crate::config::Configuration;
use crate::prelude::*;

pub struct TestConfiguration {
    pub access_control_enabled: bool,
    pub allow_anonymous_access: bool,
    pub changelog_enabled: bool,
    pub journal_enabled: bool,
    pub max_size_limit: usize,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        TestConfiguration {
            access_control_enabled: false,
            allow_anonymous_access: false,
            changelog_enabled: true,
            journal_enabled: true,
            max_size_limit: 1000,
        }
    }
}

/// Start an in memory service holding the system partition and `dc=example,dc=com`.
#[allow(clippy::expect_used)]
pub fn setup_test(config: TestConfiguration) -> DirectoryService {
    sketching::test_init();

    let mut service_config = Configuration::new_for_test();
    service_config.access_control_enabled = config.access_control_enabled;
    service_config.allow_anonymous_access = config.allow_anonymous_access;
    service_config.changelog.enabled = config.changelog_enabled;
    service_config.journal.enabled = config.journal_enabled;
    service_config.limits.max_size_limit = config.max_size_limit;

    DirectoryService::new(service_config).expect("Failed to setup the directory service")
}
