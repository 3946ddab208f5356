use std::collections::HashMap;

use crate::session::ProviderRegistration;

/// Bound providers keyed by name.
pub type ProviderSet = HashMap<String, ProviderRegistration>;

/// Collapses a list into a set. A later registration of the same name wins.
pub fn provider_set(providers: &[ProviderRegistration]) -> ProviderSet {
    providers
        .iter()
        .map(|provider| (provider.name.clone(), provider.clone()))
        .collect()
}

/// The session calls needed to go from one provider set to another.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProviderChanges {
    /// Still wanted, but with a different level or keyword mask
    pub updated: Vec<ProviderRegistration>,
    pub added: Vec<ProviderRegistration>,
    pub removed: Vec<String>,
}

impl ProviderChanges {
    pub fn between(current: &ProviderSet, desired: &ProviderSet) -> Self {
        let mut changes = ProviderChanges::default();

        for (name, wanted) in desired {
            match current.get(name) {
                Some(bound) if bound.filter_differs(wanted) => changes.updated.push(wanted.clone()),
                Some(_) => {}
                None => changes.added.push(wanted.clone()),
            }
        }
        changes.removed = current
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();

        changes.updated.sort_by(|a, b| a.name.cmp(&b.name));
        changes.added.sort_by(|a, b| a.name.cmp(&b.name));
        changes.removed.sort();
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::TraceLevel;

    fn provider(name: &str, level: TraceLevel) -> ProviderRegistration {
        ProviderRegistration::new(name, level)
    }

    #[test]
    fn unchanged_set_needs_no_calls() {
        let current = provider_set(&[
            provider("io", TraceLevel::Informational),
            provider("net", TraceLevel::Warning),
        ]);
        let changes = ProviderChanges::between(&current, &current.clone());
        assert!(changes.is_empty());
    }

    #[test]
    fn splits_updates_additions_and_removals() {
        let current = provider_set(&[
            provider("io", TraceLevel::Informational),
            provider("net", TraceLevel::Warning),
            provider("disk", TraceLevel::Error),
        ]);
        let desired = provider_set(&[
            provider("io", TraceLevel::Verbose),
            provider("net", TraceLevel::Warning).with_keywords(0x10),
            provider("disk", TraceLevel::Error),
            provider("gpu", TraceLevel::Critical),
        ]);

        let changes = ProviderChanges::between(&current, &desired);

        assert_eq!(
            changes.updated,
            vec![
                provider("io", TraceLevel::Verbose),
                provider("net", TraceLevel::Warning).with_keywords(0x10),
            ]
        );
        assert_eq!(changes.added, vec![provider("gpu", TraceLevel::Critical)]);
        assert!(changes.removed.is_empty());

        let changes = ProviderChanges::between(&desired, &current);
        assert_eq!(changes.removed, vec!["gpu".to_string()]);
    }

    #[test]
    fn process_filter_alone_does_not_rebind() {
        let current = provider_set(&[provider("io", TraceLevel::Informational)]);
        let mut narrowed = provider("io", TraceLevel::Informational);
        narrowed.process_names.push("svchost.exe".to_string());

        let changes = ProviderChanges::between(&current, &provider_set(&[narrowed]));
        assert!(changes.is_empty());
    }

    #[test]
    fn later_duplicate_wins() {
        let set = provider_set(&[
            provider("io", TraceLevel::Informational),
            provider("io", TraceLevel::Verbose),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set["io"].level, TraceLevel::Verbose);
    }
}
