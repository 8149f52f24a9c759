//! Whole-pipeline properties of the default rule table:
//! weight conservation, provenance completeness, canonical-name selection,
//! no-op steps, step-order sensitivity and the input contract.

use leader_clusters::{
    default_rules, records_from_pairs, ClusterEngine, ClusterError, NameRecord, Rule,
};
use std::collections::HashMap;

fn roster() -> Vec<(&'static str, u64)> {
    vec![
        ("John Smith", 10),
        ("Jahn Smith", 2),
        ("Jon Smith", 3),
        ("Jane Doe", 1),
        ("Mary-Ann Jones", 4),
        ("Mary Ann Jones", 4),
        ("MaryAnn Jones", 1),
        ("J.W. Lee", 6),
        ("J. W. Lee", 2),
        ("JW Lee", 1),
        ("Bill O\u{2019}Neal", 5),
        ("Bill O'Neal", 7),
        ("BIll ONeal", 1),
        ("Annie McKinney", 3),
        ("Anie McKinny", 3),
        ("Leigh Reeves", 2),
        ("Lee Reeve", 2),
        ("Ruth Hughes", 8),
        ("Ruthe Hughs", 1),
        ("Zoë Ballard", 1),
    ]
}

fn run_default(pairs: Vec<(&str, u64)>) -> leader_clusters::RunOutcome {
    let engine = ClusterEngine::with_default_rules().unwrap();
    engine.run(records_from_pairs(pairs).unwrap()).unwrap()
}

#[test]
fn test_weight_is_conserved() {
    let input = roster();
    let expected: u64 = input.iter().map(|(_, w)| w).sum();

    let outcome = run_default(input);

    assert_eq!(outcome.total_weight(), expected);
}

#[test]
fn test_every_name_appears_exactly_once() {
    let input = roster();
    let outcome = run_default(input.clone());

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for cluster in &outcome.clusters {
        for member in &cluster.provenance {
            *seen.entry(member.name.as_str()).or_insert(0) += 1;
        }
        // Each cluster's weight is the sum of what it absorbed
        let absorbed: u64 = cluster.provenance.iter().map(|p| p.weight).sum();
        assert_eq!(cluster.weight, absorbed, "cluster {:?}", cluster.canonical_name);
    }

    assert_eq!(seen.len(), input.len());
    for (name, _) in &input {
        assert_eq!(seen.get(name), Some(&1), "{} should appear once", name);
    }
}

#[test]
fn test_merge_count_matches_cluster_shrinkage() {
    let input = roster();
    let outcome = run_default(input.clone());

    let per_step: usize = outcome.reports.iter().map(|r| r.merge_count).sum();
    assert_eq!(outcome.total_merges, per_step);
    assert_eq!(outcome.clusters.len(), input.len() - outcome.total_merges);
}

#[test]
fn test_heavier_name_is_canonical() {
    let outcome = run_default(vec![("Ann Lee", 5), ("ann lee", 3)]);
    assert_eq!(outcome.clusters[0].canonical_name, "Ann Lee");

    let outcome = run_default(vec![("ann lee", 3), ("Ann Lee", 5)]);
    assert_eq!(outcome.clusters[0].canonical_name, "Ann Lee");
}

#[test]
fn test_equal_weight_keeps_first_name() {
    let outcome = run_default(vec![("Ann Lee", 4), ("ann lee", 4)]);
    assert_eq!(outcome.clusters[0].canonical_name, "Ann Lee");

    let outcome = run_default(vec![("ann lee", 4), ("Ann Lee", 4)]);
    assert_eq!(outcome.clusters[0].canonical_name, "ann lee");
}

#[test]
fn test_no_op_rule_leaves_records_unchanged() {
    let engine = ClusterEngine::new(&[Rule::template("Strip digits", "[0-9]", "")]).unwrap();
    let records = records_from_pairs(roster()).unwrap();

    let outcome = engine.run(records.clone()).unwrap();

    assert_eq!(outcome.clusters, records);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].merge_count, 0);
    assert!(outcome.reports[0].merges.is_empty());
}

#[test]
fn test_reports_follow_documented_order() {
    let outcome = run_default(roster());

    let reported: Vec<&str> = outcome.reports.iter().map(|r| r.description.as_str()).collect();
    let documented: Vec<String> = default_rules().into_iter().map(|r| r.description).collect();

    assert_eq!(reported, documented);
    for (i, report) in outcome.reports.iter().enumerate() {
        assert_eq!(report.step, i);
    }
}

#[test]
fn test_step_order_changes_membership() {
    let names = vec![("Mary-Ann Smith", 3), ("Mary Ann Smith", 2), ("MaryAnn Smith", 1)];

    // Documented order: hyphens become spaces before punctuation is removed
    let outcome = run_default(names.clone());
    let cluster = outcome.cluster_of("Mary-Ann Smith").unwrap();
    let members: Vec<&str> = cluster.provenance.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(members, vec!["Mary-Ann Smith", "Mary Ann Smith"]);

    // Swapped: the hyphen is deleted first, so the hyphenated name joins "MaryAnn"
    let mut swapped = default_rules();
    swapped.swap(4, 5);
    let engine = ClusterEngine::new(&swapped).unwrap();
    let outcome = engine.run(records_from_pairs(names).unwrap()).unwrap();
    let cluster = outcome.cluster_of("Mary-Ann Smith").unwrap();
    let members: Vec<&str> = cluster.provenance.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(members, vec!["Mary-Ann Smith", "MaryAnn Smith"]);
}

#[test]
fn test_vowel_wildcard_scenario() {
    let outcome = run_default(vec![
        ("John Smith", 10),
        ("Jahn Smith", 2),
        ("Jon Smith", 3),
        ("Jane Doe", 1),
    ]);

    assert_eq!(outcome.total_merges, 1);

    // Only the final step merges, once every vowel is a wildcard
    let merged_steps: Vec<usize> = outcome
        .reports
        .iter()
        .filter(|r| r.has_merges())
        .map(|r| r.step)
        .collect();
    assert_eq!(merged_steps, vec![12]);

    let smith = outcome.cluster_of("Jahn Smith").unwrap();
    assert_eq!(smith.canonical_name, "John Smith");
    assert_eq!(smith.weight, 12);
    assert_eq!(smith.key, "j*hn sm*t");

    // "jon" keeps no "h", so it stays apart from "john"
    let jon = outcome.cluster_of("Jon Smith").unwrap();
    assert_eq!(jon.weight, 3);
    assert_eq!(jon.member_count(), 1);

    let jane = outcome.cluster_of("Jane Doe").unwrap();
    assert_eq!(jane.weight, 1);
    assert_eq!(jane.member_count(), 1);
}

#[test]
fn test_duplicate_names_rejected_before_run() {
    let result = records_from_pairs(vec![("Ann Lee", 1), ("Bo Day", 2), ("Ann Lee", 3)]);
    assert!(matches!(result, Err(ClusterError::DuplicateName { .. })));

    let engine = ClusterEngine::with_default_rules().unwrap();
    let records = vec![NameRecord::new("Ann Lee", 1), NameRecord::new("Ann Lee", 3)];
    let mut steps_seen = 0;
    let result = engine.run_with_sink(records, &mut |_: &leader_clusters::StepReport| -> std::io::Result<()> {
        steps_seen += 1;
        Ok(())
    });

    assert!(matches!(result, Err(ClusterError::DuplicateName { .. })));
    assert_eq!(steps_seen, 0, "no step should run on invalid input");
}

#[test]
fn test_invalid_rule_fails_before_run() {
    let mut rules = default_rules();
    rules.push(Rule::template("Broken", "(unclosed", ""));

    let result = ClusterEngine::new(&rules);
    assert!(matches!(result, Err(ClusterError::InvalidPattern { step: 13, .. })));

    assert!(matches!(ClusterEngine::new(&[]), Err(ClusterError::EmptyRuleTable)));
}
