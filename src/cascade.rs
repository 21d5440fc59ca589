use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::classifier::{CategoryOption, Classifier, ClassifyRequest, ConfirmedExample};
use crate::error::Result;
use crate::models::{tier, ReviewStatus};

pub const DEFAULT_AUTO_CONFIRM_THRESHOLD: i64 = 3;

/// Confidence attached to generative-fallback predictions. They always go
/// through review, so this is informational only.
const AI_CONFIDENCE: f64 = 0.7;

/// Outcome of one pass through the cascade.
#[derive(Debug, Clone)]
pub struct Classification {
    pub category_id: Option<i64>,
    pub tier: Option<&'static str>,
    pub status: ReviewStatus,
    pub confidence: f64,
}

impl Classification {
    fn none() -> Self {
        Self {
            category_id: None,
            tier: None,
            status: ReviewStatus::PendingReview,
            confidence: 0.0,
        }
    }
}

/// Run a description/amount through the priority cascade. Tiers are tried in
/// strict order and the first match wins; later tiers are never consulted.
pub fn classify(
    conn: &Connection,
    description: &str,
    amount: f64,
    classifier: Option<&dyn Classifier>,
    threshold: i64,
) -> Result<Classification> {
    let desc_upper = description.to_uppercase();
    let desc_upper = desc_upper.trim();

    if let Some(result) = check_amount_rules(conn, desc_upper, amount)? {
        debug!(description, tier = "amount_rule", "cascade match");
        return Ok(result);
    }

    if let Some(result) = check_merchant_mappings(conn, desc_upper, threshold)? {
        debug!(description, tier = "merchant_map", "cascade match");
        return Ok(result);
    }

    if let Some(clf) = classifier {
        if let Some(result) = classify_with_fallback(conn, description, amount, clf)? {
            debug!(description, tier = "ai", "cascade match");
            return Ok(result);
        }
    }

    debug!(description, "no cascade match");
    Ok(Classification::none())
}

/// Tier 1: exact-amount rules disambiguate merchants that bill several
/// unrelated products at fixed price points.
fn check_amount_rules(
    conn: &Connection,
    desc_upper: &str,
    amount: f64,
) -> Result<Option<Classification>> {
    let mut stmt =
        conn.prepare("SELECT pattern, amount, tolerance, category_id FROM amount_rules")?;
    let rules: Vec<(String, f64, f64, i64)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (pattern, rule_amount, tolerance, category_id) in rules {
        if desc_upper.contains(&pattern.to_uppercase())
            && (amount - rule_amount).abs() <= tolerance
        {
            return Ok(Some(Classification {
                category_id: Some(category_id),
                tier: Some(tier::AMOUNT_RULE),
                status: ReviewStatus::AutoConfirmed,
                confidence: 1.0,
            }));
        }
    }
    Ok(None)
}

/// Tier 2: learned merchant patterns. The longest matching pattern wins
/// (most specific); confidence at or above the threshold bypasses review.
fn check_merchant_mappings(
    conn: &Connection,
    desc_upper: &str,
    threshold: i64,
) -> Result<Option<Classification>> {
    let mut stmt = conn.prepare("SELECT pattern, category_id, confidence FROM merchant_mappings")?;
    let mappings: Vec<(String, i64, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut best: Option<(i64, i64)> = None;
    let mut best_len = 0usize;

    for (pattern, category_id, confidence) in &mappings {
        let pat_upper = pattern.to_uppercase();
        let matched = match Regex::new(&pat_upper) {
            Ok(re) => re.is_match(desc_upper),
            // Not valid regex; fall back to a literal substring check.
            Err(_) => desc_upper.contains(&pat_upper),
        };
        if matched && pat_upper.len() > best_len {
            best = Some((*category_id, *confidence));
            best_len = pat_upper.len();
        }
    }

    Ok(best.map(|(category_id, confidence)| {
        let status = if confidence >= threshold {
            ReviewStatus::AutoConfirmed
        } else {
            ReviewStatus::PendingReview
        };
        Classification {
            category_id: Some(category_id),
            tier: Some(tier::MERCHANT_MAP),
            status,
            confidence: (confidence as f64 / threshold as f64).min(1.0),
        }
    }))
}

/// Tier 3: generative fallback. Network or validation failures are swallowed
/// and downgraded to "no match" so ingestion always completes.
fn classify_with_fallback(
    conn: &Connection,
    description: &str,
    amount: f64,
    classifier: &dyn Classifier,
) -> Result<Option<Classification>> {
    let request = ClassifyRequest {
        description: description.to_string(),
        amount,
        categories: leaf_categories(conn)?,
        examples: recent_confirmed_examples(conn, 50)?,
    };

    let predicted = match classifier.classify(&request) {
        Ok(key) => key,
        Err(e) => {
            warn!(description, error = %e, "fallback classification failed");
            return Ok(None);
        }
    };

    // Only accept keys that exist in the real taxonomy.
    let category_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM categories WHERE key = ?1",
            [predicted.as_str()],
            |r| r.get(0),
        )
        .ok();

    match category_id {
        Some(id) => Ok(Some(Classification {
            category_id: Some(id),
            tier: Some(tier::AI),
            status: ReviewStatus::PendingReview,
            confidence: AI_CONFIDENCE,
        })),
        None => {
            warn!(description, predicted, "fallback returned unknown category");
            Ok(None)
        }
    }
}

fn leaf_categories(conn: &Connection) -> Result<Vec<CategoryOption>> {
    let mut stmt = conn.prepare(
        "SELECT c.key, p.display_name FROM categories c \
         JOIN categories p ON c.parent_id = p.id ORDER BY p.display_name, c.key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategoryOption {
                key: row.get(0)?,
                group: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn recent_confirmed_examples(conn: &Connection, limit: usize) -> Result<Vec<ConfirmedExample>> {
    let mut stmt = conn.prepare(
        "SELECT t.description, t.amount, c.key FROM transactions t \
         JOIN categories c ON t.category_id = c.id \
         WHERE t.status IN ('confirmed', 'auto_confirmed') \
         ORDER BY t.created_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(ConfirmedExample {
                description: row.get(0)?,
                amount: row.get(1)?,
                category_key: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts reported by a batch categorization run.
#[derive(Debug, Default, Clone)]
pub struct BatchStats {
    pub processed: usize,
    pub auto_staged: usize,
    pub predicted: usize,
    pub unmatched: usize,
    pub total_eligible: usize,
    pub amount_rule: usize,
    pub merchant_map: usize,
    pub ai: usize,
}

/// Run the cascade over pending_review rows that have neither a prediction
/// nor a previous failed attempt. Auto-confirmed matches are staged
/// (pending_save); the rest become predictions awaiting review. Rows with no
/// match are marked `unmatched` so the next run does not retry them.
pub fn batch_categorize(
    conn: &Connection,
    classifier: Option<&dyn Classifier>,
    threshold: i64,
    limit: usize,
) -> Result<BatchStats> {
    const ELIGIBLE: &str = "status = 'pending_review' \
         AND predicted_category_id IS NULL AND category_id IS NULL \
         AND (tier IS NULL OR tier != 'unmatched')";

    let total_eligible: i64 = conn.query_row(
        &format!("SELECT count(*) FROM transactions WHERE {ELIGIBLE}"),
        [],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT id, description, amount FROM transactions WHERE {ELIGIBLE} \
         ORDER BY date DESC LIMIT ?1"
    ))?;
    let rows: Vec<(i64, String, f64)> = stmt
        .query_map([limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stats = BatchStats {
        total_eligible: total_eligible as usize,
        ..BatchStats::default()
    };

    for (txn_id, description, amount) in &rows {
        stats.processed += 1;

        let result = classify(conn, description, *amount, classifier, threshold)?;
        match result.tier {
            Some(tier::AMOUNT_RULE) => stats.amount_rule += 1,
            Some(tier::MERCHANT_MAP) => stats.merchant_map += 1,
            Some(tier::AI) => stats.ai += 1,
            _ => {}
        }

        match result.category_id {
            Some(category_id) if result.status == ReviewStatus::AutoConfirmed => {
                conn.execute(
                    "UPDATE transactions SET category_id = ?1, status = 'pending_save', \
                     tier = ?2, confidence = ?3 WHERE id = ?4",
                    rusqlite::params![category_id, result.tier, result.confidence, txn_id],
                )?;
                stats.auto_staged += 1;
            }
            Some(category_id) => {
                conn.execute(
                    "UPDATE transactions SET predicted_category_id = ?1, \
                     tier = ?2, confidence = ?3 WHERE id = ?4",
                    rusqlite::params![category_id, result.tier, result.confidence, txn_id],
                )?;
                stats.predicted += 1;
            }
            None => {
                conn.execute(
                    "UPDATE transactions SET tier = ?1 WHERE id = ?2",
                    rusqlite::params![tier::UNMATCHED, txn_id],
                )?;
                stats.unmatched += 1;
            }
        }

        if stats.processed % 50 == 0 {
            info!(processed = stats.processed, total = rows.len(), "batch categorize progress");
        }
    }

    info!(
        processed = stats.processed,
        auto_staged = stats.auto_staged,
        predicted = stats.predicted,
        unmatched = stats.unmatched,
        "batch categorize complete"
    );
    Ok(stats)
}

/// Reset predictions and attempt markers on pending_review rows so a batch
/// run can start from scratch.
pub fn clear_predictions(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE transactions SET predicted_category_id = NULL, confidence = NULL, tier = NULL \
         WHERE status = 'pending_review' \
         AND (predicted_category_id IS NOT NULL OR tier IS NOT NULL)",
        [],
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::error::PennyError;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn category_id(conn: &Connection, key: &str) -> i64 {
        conn.query_row("SELECT id FROM categories WHERE key = ?1", [key], |r| r.get(0))
            .unwrap()
    }

    fn add_mapping(conn: &Connection, pattern: &str, key: &str, confidence: i64) {
        conn.execute(
            "INSERT INTO merchant_mappings (pattern, category_id, confidence) VALUES (?1, ?2, ?3)",
            rusqlite::params![pattern, category_id(conn, key), confidence],
        )
        .unwrap();
    }

    fn add_amount_rule(conn: &Connection, pattern: &str, amount: f64, tolerance: f64, key: &str) {
        conn.execute(
            "INSERT INTO amount_rules (pattern, amount, tolerance, category_id) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![pattern, amount, tolerance, category_id(conn, key)],
        )
        .unwrap();
    }

    struct StubClassifier(std::result::Result<String, ()>);

    impl Classifier for StubClassifier {
        fn classify(&self, _request: &ClassifyRequest) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(PennyError::Other("network down".to_string())),
            }
        }
    }

    #[test]
    fn test_amount_rule_match() {
        let (_dir, conn) = test_db();
        add_amount_rule(&conn, "APPLE.COM/BILL", 9.99, 0.01, "streaming");
        let c = classify(&conn, "APPLE.COM/BILL 866-712-7753", 9.99, None, 3).unwrap();
        assert_eq!(c.tier, Some(tier::AMOUNT_RULE));
        assert_eq!(c.status, ReviewStatus::AutoConfirmed);
        assert_eq!(c.category_id, Some(category_id(&conn, "streaming")));
    }

    #[test]
    fn test_amount_rule_respects_tolerance() {
        let (_dir, conn) = test_db();
        add_amount_rule(&conn, "APPLE.COM/BILL", 9.99, 0.01, "streaming");
        let c = classify(&conn, "APPLE.COM/BILL", 12.99, None, 3).unwrap();
        assert_eq!(c.tier, None);
        assert_eq!(c.category_id, None);
    }

    #[test]
    fn test_tier_priority_amount_rule_beats_mapping() {
        let (_dir, conn) = test_db();
        add_amount_rule(&conn, "APPLE", 9.99, 0.01, "streaming");
        add_mapping(&conn, "APPLE", "software", 10);
        let c = classify(&conn, "APPLE.COM/BILL", 9.99, None, 3).unwrap();
        assert_eq!(c.tier, Some(tier::AMOUNT_RULE));
        assert_eq!(c.category_id, Some(category_id(&conn, "streaming")));
    }

    #[test]
    fn test_mapping_below_threshold_needs_review() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "COFFEE SHOP", "coffee", 2);
        let c = classify(&conn, "COFFEE SHOP #55", 4.75, None, 3).unwrap();
        assert_eq!(c.tier, Some(tier::MERCHANT_MAP));
        assert_eq!(c.status, ReviewStatus::PendingReview);
    }

    #[test]
    fn test_mapping_at_threshold_auto_confirms() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "COFFEE SHOP", "coffee", 3);
        let c = classify(&conn, "COFFEE SHOP #55", 4.75, None, 3).unwrap();
        assert_eq!(c.status, ReviewStatus::AutoConfirmed);
    }

    #[test]
    fn test_longest_pattern_wins() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "AMAZON", "shopping", 5);
        add_mapping(&conn, "AMAZON PRIME VIDEO", "streaming", 5);
        let c = classify(&conn, "AMAZON PRIME VIDEO*2B4", 14.99, None, 3).unwrap();
        assert_eq!(c.category_id, Some(category_id(&conn, "streaming")));
    }

    #[test]
    fn test_invalid_regex_falls_back_to_literal() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "COFFEE (SHOP", "coffee", 5);
        let c = classify(&conn, "COFFEE (SHOP #55", 4.75, None, 3).unwrap();
        assert_eq!(c.tier, Some(tier::MERCHANT_MAP));
    }

    #[test]
    fn test_fallback_validated_against_taxonomy() {
        let (_dir, conn) = test_db();
        let clf = StubClassifier(Ok("coffee".to_string()));
        let c = classify(&conn, "MYSTERY VENDOR", 4.75, Some(&clf), 3).unwrap();
        assert_eq!(c.tier, Some(tier::AI));
        assert_eq!(c.status, ReviewStatus::PendingReview);
        assert_eq!(c.category_id, Some(category_id(&conn, "coffee")));
    }

    #[test]
    fn test_fallback_unknown_key_is_no_match() {
        let (_dir, conn) = test_db();
        let clf = StubClassifier(Ok("not_a_real_category".to_string()));
        let c = classify(&conn, "MYSTERY VENDOR", 4.75, Some(&clf), 3).unwrap();
        assert_eq!(c.tier, None);
        assert_eq!(c.category_id, None);
    }

    #[test]
    fn test_fallback_failure_is_swallowed() {
        let (_dir, conn) = test_db();
        let clf = StubClassifier(Err(()));
        let c = classify(&conn, "MYSTERY VENDOR", 4.75, Some(&clf), 3).unwrap();
        assert_eq!(c.tier, None);
        assert_eq!(c.status, ReviewStatus::PendingReview);
    }

    #[test]
    fn test_earlier_tier_skips_fallback() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "COFFEE SHOP", "coffee", 5);
        // A classifier that would panic the test if consulted.
        struct Exploding;
        impl Classifier for Exploding {
            fn classify(&self, _request: &ClassifyRequest) -> Result<String> {
                panic!("tier 3 consulted despite tier 2 match");
            }
        }
        let c = classify(&conn, "COFFEE SHOP #55", 4.75, Some(&Exploding), 3).unwrap();
        assert_eq!(c.tier, Some(tier::MERCHANT_MAP));
    }

    fn insert_pending(conn: &Connection, description: &str, amount: f64) -> i64 {
        conn.execute(
            "INSERT INTO accounts (name, institution, account_type) \
             SELECT 'Test', 'test', 'checking' \
             WHERE NOT EXISTS (SELECT 1 FROM accounts)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, source) \
             VALUES (1, '2025-03-01', ?1, ?2, 'file_import')",
            rusqlite::params![description, amount],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_batch_stages_auto_confirmed_and_predicts_low_confidence() {
        let (_dir, conn) = test_db();
        add_mapping(&conn, "COFFEE SHOP", "coffee", 5);
        add_mapping(&conn, "NEW VENDOR", "shopping", 1);
        let auto_id = insert_pending(&conn, "COFFEE SHOP #55", 4.75);
        let low_id = insert_pending(&conn, "NEW VENDOR LLC", 20.00);
        let miss_id = insert_pending(&conn, "TOTALLY UNKNOWN", 1.00);

        let stats = batch_categorize(&conn, None, 3, 100).unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.auto_staged, 1);
        assert_eq!(stats.predicted, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.merchant_map, 2);

        let status: String = conn
            .query_row("SELECT status FROM transactions WHERE id = ?1", [auto_id], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "pending_save");
        let (status, predicted): (String, Option<i64>) = conn
            .query_row(
                "SELECT status, predicted_category_id FROM transactions WHERE id = ?1",
                [low_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "pending_review");
        assert!(predicted.is_some());
        let marker: Option<String> = conn
            .query_row("SELECT tier FROM transactions WHERE id = ?1", [miss_id], |r| r.get(0))
            .unwrap();
        assert_eq!(marker.as_deref(), Some("unmatched"));
    }

    #[test]
    fn test_batch_skips_previously_unmatched() {
        let (_dir, conn) = test_db();
        insert_pending(&conn, "TOTALLY UNKNOWN", 1.00);
        let first = batch_categorize(&conn, None, 3, 100).unwrap();
        assert_eq!(first.processed, 1);
        let second = batch_categorize(&conn, None, 3, 100).unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.total_eligible, 0);
    }

    #[test]
    fn test_clear_predictions_resets_markers() {
        let (_dir, conn) = test_db();
        insert_pending(&conn, "TOTALLY UNKNOWN", 1.00);
        batch_categorize(&conn, None, 3, 100).unwrap();
        let cleared = clear_predictions(&conn).unwrap();
        assert_eq!(cleared, 1);
        let third = batch_categorize(&conn, None, 3, 100).unwrap();
        assert_eq!(third.processed, 1);
    }
}
