// Property-based tests for configuration resolution
// Feature: database-manager

use database_manager::config::Settings;
use database_manager::resolver::{resolve, EnvSnapshot};
use database_manager::{ConfigError, DatabaseIdentifier};
use proptest::prelude::*;

fn uri_var(identifier: DatabaseIdentifier) -> String {
    format!("DATABASE_URI_{}", identifier.env_suffix())
}

fn uri_for(identifier: DatabaseIdentifier) -> String {
    format!("postgres://app:pw@{}-db:5432/{}", identifier, identifier)
}

/// **Property: every identifier is required**
///
/// *For any* subset of databases given a connection string, resolution
/// succeeds only when the subset is complete; otherwise it reports the first
/// missing database in declaration order.
#[test]
fn property_missing_uri_is_reported_in_declaration_order() {
    proptest!(|(present in prop::collection::vec(any::<bool>(), DatabaseIdentifier::COUNT))| {
        let env: EnvSnapshot = DatabaseIdentifier::ALL
            .iter()
            .zip(&present)
            .filter(|(_, &keep)| keep)
            .map(|(&id, _)| (uri_var(id), uri_for(id)))
            .collect();

        let result = resolve(&env, &Settings::default().pool);
        let first_missing = DatabaseIdentifier::ALL
            .iter()
            .zip(&present)
            .find(|(_, &keep)| !keep)
            .map(|(&id, _)| id);

        match first_missing {
            None => {
                let resolved = result.unwrap();
                prop_assert_eq!(resolved.len(), DatabaseIdentifier::COUNT);
                for (id, descriptor) in &resolved {
                    prop_assert_eq!(descriptor.identifier(), *id);
                    prop_assert_eq!(descriptor.uri(), uri_for(*id));
                }
            }
            Some(id) => {
                prop_assert_eq!(result, Err(ConfigError::MissingVariable(uri_var(id))));
            }
        }
    });
}

/// **Property: names outside the closed set are configuration errors**
///
/// *For any* extra `DATABASE_URI_<NAME>` whose name is not a known database,
/// resolution fails with `UnknownIdentifier` naming it.
#[test]
fn property_unknown_identifier_is_rejected() {
    proptest!(|(name in "[A-Z][A-Z_]{2,12}")| {
        prop_assume!(DatabaseIdentifier::ALL.iter().all(|id| id.env_suffix() != name));

        let mut vars: Vec<(String, String)> = DatabaseIdentifier::ALL
            .iter()
            .map(|&id| (uri_var(id), uri_for(id)))
            .collect();
        vars.push((format!("DATABASE_URI_{}", name), "postgres://x-db/x".to_string()));
        let env: EnvSnapshot = vars.into_iter().collect();

        let result = resolve(&env, &Settings::default().pool);
        prop_assert_eq!(
            result,
            Err(ConfigError::UnknownIdentifier {
                name: name.clone(),
                variable: format!("DATABASE_URI_{}", name),
            })
        );
    });
}

/// **Property: resolution is deterministic**
///
/// *For any* environment, resolving twice yields the same outcome, including
/// which error is reported when several problems exist at once.
#[test]
fn property_resolution_is_deterministic() {
    proptest!(|(
        extra_names in prop::collection::vec("[A-Z]{3,8}", 0..4),
        drop_index in 0usize..(DatabaseIdentifier::COUNT + 1)
    )| {
        let mut vars: Vec<(String, String)> = DatabaseIdentifier::ALL
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != drop_index)
            .map(|(_, &id)| (uri_var(id), uri_for(id)))
            .collect();
        for name in &extra_names {
            vars.push((format!("DATABASE_MAX_CONNECTIONS_{}", name), "3".to_string()));
        }

        let first: EnvSnapshot = vars.iter().cloned().collect();
        let second: EnvSnapshot = vars.into_iter().rev().collect();
        let defaults = Settings::default().pool;

        prop_assert_eq!(resolve(&first, &defaults), resolve(&second, &defaults));
    });
}

/// **Property: overrides are parsed or rejected, never ignored**
#[test]
fn property_max_connection_override_applies() {
    proptest!(|(max in 1u32..500u32, target in prop::sample::select(DatabaseIdentifier::ALL.to_vec()))| {
        let mut vars: Vec<(String, String)> = DatabaseIdentifier::ALL
            .iter()
            .map(|&id| (uri_var(id), uri_for(id)))
            .collect();
        vars.push((format!("DATABASE_MAX_CONNECTIONS_{}", target.env_suffix()), max.to_string()));
        vars.push((format!("DATABASE_MIN_CONNECTIONS_{}", target.env_suffix()), "1".to_string()));
        let env: EnvSnapshot = vars.into_iter().collect();

        let resolved = resolve(&env, &Settings::default().pool).unwrap();
        prop_assert_eq!(resolved[&target].max_connections(), max);
    });
}
