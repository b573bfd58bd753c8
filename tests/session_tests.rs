//! Tests for session identity generation.
//!
//! Validates identifier formats and the distinctness of identifiers drawn
//! within one process.

use std::collections::HashSet;

use workcell::SessionIdentity;

#[test]
fn test_container_and_branch_names_share_the_identifier() {
    let identity = SessionIdentity::generate();
    let name = identity.container_name();
    let branch = identity.branch_name();

    let id_from_name = name
        .strip_prefix("workcell-")
        .expect("container name must be prefix-dash-id");
    let id_from_branch = branch
        .strip_prefix("workcell/")
        .expect("branch name must be prefix-slash-id");
    assert_eq!(id_from_name, id_from_branch);

    let id: u32 = id_from_name.parse().expect("identifier must be decimal");
    assert!(id < 10_000);
}

#[test]
fn test_display_matches_container_name() {
    let identity = SessionIdentity::generate();
    assert_eq!(identity.to_string(), identity.container_name());
}

#[test]
fn test_identifiers_are_mostly_distinct_over_a_thousand_draws() {
    let distinct: HashSet<String> = (0..1000)
        .map(|_| SessionIdentity::generate().container_name())
        .collect();
    // Uniform draws over 0..10_000 collide occasionally; anything below 90%
    // distinct indicates a broken distribution.
    assert!(
        distinct.len() >= 900,
        "only {} of 1000 identifiers were distinct",
        distinct.len()
    );
}
