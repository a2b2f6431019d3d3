//! The HTTP request matcher: weighted scoring selection of the best
//! mock for a request, with path-parameter/regex capture extraction and
//! near-miss diagnostics for unmatched requests.

use std::collections::HashMap;

use crate::mock::{HttpMatcher, Mock, MockSpec};

/// Fixed scoring weights used to rank candidate mocks.
mod weight {
    pub const METHOD: u32 = 10;
    pub const PATH_EXACT: u32 = 15;
    pub const PATH_REGEX: u32 = 14;
    pub const PATH_NAMED: u32 = 12;
    pub const PATH_WILDCARD: u32 = 8;
    pub const HEADER: u32 = 5;
    pub const QUERY_PARAM: u32 = 5;
    pub const BODY_EQUALS: u32 = 25;
    pub const BODY_PATTERN: u32 = 22;
    pub const BODY_CONTAINS: u32 = 20;
}

/// A read-only view of the inbound request the matcher scores against.
/// Built once per request by the HTTP handler; the cached body is read at
/// most once.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    /// HTTP method, any case
    pub method: &'a str,
    /// Request path, not including the query string
    pub path: &'a str,
    /// Request headers, any case for names
    pub headers: &'a HashMap<String, String>,
    /// Parsed query parameters
    pub query_params: &'a HashMap<String, String>,
    /// Cached request body, if read
    pub body: Option<&'a str>,
}

/// The outcome of a successful match: the chosen mock, its score, and any
/// path parameters / named regex captures extracted from the path.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Index of the winning mock within the candidate slice passed in
    pub mock_index: usize,
    /// Total weight accumulated
    pub score: u32,
    /// Path parameters extracted from `{name}` segments, or named regex
    /// capture groups from an anchored `pathPattern`
    pub captures: HashMap<String, String>,
}

/// A per-mock record describing why a near-match failed, for diagnostics on
/// an unmatched request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NearMiss {
    /// The near-missing mock's ID
    pub mock_id: String,
    /// The near-missing mock's name, if set
    pub mock_name: Option<String>,
    /// `passed_weight / total_applied_weight`, as a percentage 0-100
    pub match_percentage: f64,
    /// Short human-readable description of what failed
    pub reason: String,
}

struct CriterionEval {
    applied_weight: u32,
    passed_weight: u32,
    rejected: bool,
    fail_reason: Option<&'static str>,
    captures: HashMap<String, String>,
}

fn eval_matcher(matcher: &HttpMatcher, req: &MatchRequest<'_>) -> CriterionEval {
    let mut applied = 0u32;
    let mut passed = 0u32;
    let mut fail_reason = None;
    let mut captures = HashMap::new();

    if matcher.path.is_some() && matcher.path_pattern.is_some() {
        return CriterionEval {
            applied_weight: 0,
            passed_weight: 0,
            rejected: true,
            fail_reason: Some("matcher has both path and pathPattern"),
            captures,
        };
    }

    if let Some(method) = &matcher.method {
        applied += weight::METHOD;
        if method.eq_ignore_ascii_case(req.method) {
            passed += weight::METHOD;
        } else {
            fail_reason.get_or_insert("method mismatch");
            return reject(applied, fail_reason);
        }
    }

    if let Some(path) = &matcher.path {
        if let Some(named) = extract_named_segments(path, req.path) {
            applied += weight::PATH_NAMED;
            passed += weight::PATH_NAMED;
            captures.extend(named);
        } else if let Some(prefix) = path.strip_suffix('*') {
            applied += weight::PATH_WILDCARD;
            if req.path.starts_with(prefix) {
                passed += weight::PATH_WILDCARD;
            } else {
                fail_reason.get_or_insert("path wildcard mismatch");
                return reject(applied, fail_reason);
            }
        } else {
            applied += weight::PATH_EXACT;
            if path == req.path {
                passed += weight::PATH_EXACT;
            } else {
                fail_reason.get_or_insert("path mismatch");
                return reject(applied, fail_reason);
            }
        }
    } else if let Some(pattern) = matcher.compiled_path_pattern() {
        applied += weight::PATH_REGEX;
        if let Some(caps) = pattern.captures(req.path) {
            passed += weight::PATH_REGEX;
            for name in pattern.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    captures.insert(name.to_string(), m.as_str().to_string());
                }
            }
        } else {
            fail_reason.get_or_insert("pathPattern mismatch");
            return reject(applied, fail_reason);
        }
    }

    for (name, expected) in &matcher.headers {
        applied += weight::HEADER;
        let found = req
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());
        if found == Some(expected.as_str()) {
            passed += weight::HEADER;
        } else {
            fail_reason.get_or_insert("required header missing or mismatched");
            return reject(applied, fail_reason);
        }
    }

    for (name, expected) in &matcher.query_params {
        applied += weight::QUERY_PARAM;
        if req.query_params.get(name) == Some(expected) {
            passed += weight::QUERY_PARAM;
        } else {
            fail_reason.get_or_insert("required query param missing or mismatched");
            return reject(applied, fail_reason);
        }
    }

    if let Some(expected) = &matcher.body_equals {
        applied += weight::BODY_EQUALS;
        if req.body == Some(expected.as_str()) {
            passed += weight::BODY_EQUALS;
        } else {
            fail_reason.get_or_insert("body does not equal expected value");
            return reject(applied, fail_reason);
        }
    }

    if let Some(pattern) = matcher.compiled_body_pattern() {
        applied += weight::BODY_PATTERN;
        if req.body.map(|b| pattern.is_match(b)).unwrap_or(false) {
            passed += weight::BODY_PATTERN;
        } else {
            fail_reason.get_or_insert("body does not match pattern");
            return reject(applied, fail_reason);
        }
    }

    if let Some(substr) = &matcher.body_contains {
        applied += weight::BODY_CONTAINS;
        if req.body.map(|b| b.contains(substr.as_str())).unwrap_or(false) {
            passed += weight::BODY_CONTAINS;
        } else {
            fail_reason.get_or_insert("body does not contain required substring");
            return reject(applied, fail_reason);
        }
    }

    CriterionEval {
        applied_weight: applied,
        passed_weight: passed,
        rejected: false,
        fail_reason: None,
        captures,
    }
}

fn reject(applied: u32, fail_reason: Option<&'static str>) -> CriterionEval {
    CriterionEval {
        applied_weight: applied,
        passed_weight: 0,
        rejected: true,
        fail_reason,
        captures: HashMap::new(),
    }
}

/// Extract `{name}` segments from a path pattern like `/users/{id}` against
/// a concrete request path. Returns `None` if the segment counts differ or
/// any literal segment mismatches, or if the pattern has no `{` at all
/// (plain literal paths are handled by the exact-match branch instead).
fn extract_named_segments(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    if !pattern.contains('{') {
        return None;
    }
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();
    if pattern_parts.len() != path_parts.len() {
        return None;
    }
    let mut captures = HashMap::new();
    for (p, actual) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = p.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            captures.insert(name.to_string(), (*actual).to_string());
        } else if p != actual {
            return None;
        }
    }
    Some(captures)
}

/// Score every candidate HTTP mock against `req` and return the best match
/// (highest score; ties broken by mock priority desc, then earlier
/// `created_at`), or `None` if no candidate matched. `mocks` is assumed
/// already in store order ([`crate::store::MockStore::list_by_type`]).
pub fn select_best_match(mocks: &[Mock], req: &MatchRequest<'_>) -> Option<MatchOutcome> {
    let mut best: Option<(usize, u32, HashMap<String, String>)> = None;
    for (idx, mock) in mocks.iter().enumerate() {
        let MockSpec::Http(http) = &mock.spec else {
            continue;
        };
        let eval = eval_matcher(&http.matcher, req);
        if eval.rejected {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_idx, best_score, _)) => {
                eval.passed_weight > *best_score
                    || (eval.passed_weight == *best_score && is_preferred(mocks, idx, *best_idx))
            }
        };
        if better {
            best = Some((idx, eval.passed_weight, eval.captures));
        }
    }
    best.map(|(mock_index, score, captures)| MatchOutcome {
        mock_index,
        score,
        captures,
    })
}

/// Whether mock at `candidate` should win a tie against the mock currently
/// at `incumbent`: higher `priority`, then earlier `created_at`.
fn is_preferred(mocks: &[Mock], candidate: usize, incumbent: usize) -> bool {
    let c = &mocks[candidate];
    let i = &mocks[incumbent];
    match c.priority().cmp(&i.priority()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => c.created_at < i.created_at,
    }
}

/// A per-criterion evaluation that never short-circuits: every criterion
/// configured on the matcher is checked and counted, even after the first
/// one fails. [`eval_matcher`] stops at the first failure because it only
/// needs a pass/fail verdict; near-miss diagnostics need the full picture.
struct FullEval {
    applied_weight: u32,
    passed_weight: u32,
    fail_count: usize,
    first_fail_reason: Option<&'static str>,
}

fn eval_matcher_full(matcher: &HttpMatcher, req: &MatchRequest<'_>) -> FullEval {
    let mut applied = 0u32;
    let mut passed = 0u32;
    let mut fail_count = 0usize;
    let mut first_fail_reason = None;

    if matcher.path.is_some() && matcher.path_pattern.is_some() {
        return FullEval {
            applied_weight: 0,
            passed_weight: 0,
            fail_count: 1,
            first_fail_reason: Some("matcher has both path and pathPattern"),
        };
    }

    let mut fail = |count: &mut usize, first: &mut Option<&'static str>, reason: &'static str| {
        *count += 1;
        first.get_or_insert(reason);
    };

    if let Some(method) = &matcher.method {
        applied += weight::METHOD;
        if method.eq_ignore_ascii_case(req.method) {
            passed += weight::METHOD;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "method mismatch");
        }
    }

    if let Some(path) = &matcher.path {
        if let Some(named) = extract_named_segments(path, req.path) {
            applied += weight::PATH_NAMED;
            passed += weight::PATH_NAMED;
            let _ = named;
        } else if let Some(prefix) = path.strip_suffix('*') {
            applied += weight::PATH_WILDCARD;
            if req.path.starts_with(prefix) {
                passed += weight::PATH_WILDCARD;
            } else {
                fail(&mut fail_count, &mut first_fail_reason, "path wildcard mismatch");
            }
        } else {
            applied += weight::PATH_EXACT;
            if path == req.path {
                passed += weight::PATH_EXACT;
            } else {
                fail(&mut fail_count, &mut first_fail_reason, "path mismatch");
            }
        }
    } else if let Some(pattern) = matcher.compiled_path_pattern() {
        applied += weight::PATH_REGEX;
        if pattern.is_match(req.path) {
            passed += weight::PATH_REGEX;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "pathPattern mismatch");
        }
    }

    for (name, expected) in &matcher.headers {
        applied += weight::HEADER;
        let found = req
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());
        if found == Some(expected.as_str()) {
            passed += weight::HEADER;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "required header missing or mismatched");
        }
    }

    for (name, expected) in &matcher.query_params {
        applied += weight::QUERY_PARAM;
        if req.query_params.get(name) == Some(expected) {
            passed += weight::QUERY_PARAM;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "required query param missing or mismatched");
        }
    }

    if let Some(expected) = &matcher.body_equals {
        applied += weight::BODY_EQUALS;
        if req.body == Some(expected.as_str()) {
            passed += weight::BODY_EQUALS;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "body does not equal expected value");
        }
    }

    if let Some(pattern) = matcher.compiled_body_pattern() {
        applied += weight::BODY_PATTERN;
        if req.body.map(|b| pattern.is_match(b)).unwrap_or(false) {
            passed += weight::BODY_PATTERN;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "body does not match pattern");
        }
    }

    if let Some(substr) = &matcher.body_contains {
        applied += weight::BODY_CONTAINS;
        if req.body.map(|b| b.contains(substr.as_str())).unwrap_or(false) {
            passed += weight::BODY_CONTAINS;
        } else {
            fail(&mut fail_count, &mut first_fail_reason, "body does not contain required substring");
        }
    }

    FullEval {
        applied_weight: applied,
        passed_weight: passed,
        fail_count,
        first_fail_reason,
    }
}

/// Up to `k` near-miss records for mocks that would have matched but for at
/// most 2 failing criteria, sorted by descending match percentage.
/// `matchPercentage` is `passedWeight / totalAppliedWeight` over every
/// criterion configured on the mock's matcher, not just the ones evaluated
/// before a first failure.
pub fn collect_near_misses(mocks: &[Mock], req: &MatchRequest<'_>, k: usize) -> Vec<NearMiss> {
    let mut misses: Vec<NearMiss> = Vec::new();
    for mock in mocks {
        let MockSpec::Http(http) = &mock.spec else {
            continue;
        };
        let eval = eval_matcher_full(&http.matcher, req);
        if eval.fail_count == 0 || eval.fail_count > 2 || eval.applied_weight == 0 {
            continue;
        }
        let percentage = 100.0 * eval.passed_weight as f64 / eval.applied_weight as f64;
        let reason = if eval.fail_count > 1 {
            format!(
                "{} ({} criteria failed)",
                eval.first_fail_reason.unwrap_or("unknown criterion failure"),
                eval.fail_count
            )
        } else {
            eval.first_fail_reason.unwrap_or("unknown criterion failure").to_string()
        };
        misses.push(NearMiss {
            mock_id: mock.id.clone(),
            mock_name: mock.name.clone(),
            match_percentage: percentage,
            reason,
        });
    }
    misses.sort_by(|a, b| b.match_percentage.partial_cmp(&a.match_percentage).unwrap());
    misses.truncate(k);
    misses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HttpResponse, HttpSpec};
    use chrono::Utc;

    fn mock_with(id: &str, priority: i32, matcher: HttpMatcher) -> Mock {
        let now = Utc::now();
        Mock {
            id: id.into(),
            name: Some(id.into()),
            enabled: None,
            created_at: now,
            updated_at: now,
            workspace_id: None,
            spec: MockSpec::Http(HttpSpec {
                priority,
                matcher,
                response: HttpResponse {
                    status_code: 200,
                    headers: HashMap::new(),
                    body: Some("ok".into()),
                    body_file: None,
                    delay_ms: None,
                    seed: None,
                    sse: None,
                    chunked: None,
                    validation: None,
                    stateful_operation: None,
                },
            }),
        }
    }

    fn req<'a>(method: &'a str, path: &'a str, empty: &'a HashMap<String, String>) -> MatchRequest<'a> {
        MatchRequest {
            method,
            path,
            headers: empty,
            query_params: empty,
            body: None,
        }
    }

    #[test]
    fn exact_path_beats_no_match() {
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                path: Some("/users".into()),
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        let outcome = select_best_match(&mocks, &req("GET", "/users", &empty));
        assert!(outcome.is_some());
    }

    #[test]
    fn higher_priority_wins_tie() {
        let low = mock_with(
            "low",
            0,
            HttpMatcher {
                path: Some("/x".into()),
                ..Default::default()
            },
        );
        let high = mock_with(
            "high",
            5,
            HttpMatcher {
                path: Some("/x".into()),
                ..Default::default()
            },
        );
        let mocks = vec![low, high];
        let empty = HashMap::new();
        let outcome = select_best_match(&mocks, &req("GET", "/x", &empty)).unwrap();
        assert_eq!(mocks[outcome.mock_index].id, "high");
    }

    #[test]
    fn named_segments_are_captured() {
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                path: Some("/users/{id}".into()),
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        let outcome = select_best_match(&mocks, &req("GET", "/users/42", &empty)).unwrap();
        assert_eq!(outcome.captures.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn required_header_mismatch_rejects_candidate() {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                path: Some("/x".into()),
                headers,
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        let r = MatchRequest {
            method: "GET",
            path: "/x",
            headers: &empty,
            query_params: &empty,
            body: None,
        };
        assert!(select_best_match(&mocks, &r).is_none());
    }

    #[test]
    fn near_miss_reports_failing_mock() {
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                path: Some("/other".into()),
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        let misses = collect_near_misses(&mocks, &req("GET", "/x", &empty), 3);
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].mock_id, "a");
    }

    #[test]
    fn near_miss_percentage_covers_every_configured_criterion() {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                method: Some("GET".into()),
                path: Some("/other".into()),
                headers,
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        let misses = collect_near_misses(&mocks, &req("GET", "/x", &empty), 3);
        assert_eq!(misses.len(), 1);
        // method (10) and header (5) pass, path (15) fails: 15/30 = 50%.
        assert!((misses[0].match_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn near_miss_excludes_mocks_failing_more_than_two_criteria() {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        let mut query_params = HashMap::new();
        query_params.insert("page".to_string(), "1".to_string());
        let mocks = vec![mock_with(
            "a",
            0,
            HttpMatcher {
                method: Some("POST".into()),
                path: Some("/other".into()),
                headers,
                query_params,
                ..Default::default()
            },
        )];
        let empty = HashMap::new();
        // method, path, header and query all fail: 4 failing criteria.
        let misses = collect_near_misses(&mocks, &req("GET", "/x", &empty), 3);
        assert!(misses.is_empty());
    }
}
