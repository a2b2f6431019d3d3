//! Response template expansion: `{{request.*}}`, `{{params.*}}`, faker-style
//! random helpers seeded deterministically per request.

use std::collections::HashMap;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use uuid::Uuid;

use once_cell::sync::Lazy;

static TEMPLATE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_.]+)\s*\}\}").expect("valid regex"));

/// A read-only view of the data a template may interpolate: request
/// metadata, extracted path/regex captures, and an optional mTLS identity.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Request method
    pub method: String,
    /// Request path
    pub path: String,
    /// Raw query string
    pub query: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Cached request body
    pub body: Option<String>,
    /// Path parameters / regex captures
    pub params: HashMap<String, String>,
    /// Client certificate common name, if mTLS identity was attached
    pub mtls_cn: Option<String>,
    /// Deterministic RNG seeded for this response (seed selection order:
    /// query `_mockd_seed` > header `X-Mockd-Seed` > response `seed`)
    seed: Option<u64>,
}

impl TemplateContext {
    /// Resolve the seed for this response using the following precedence:
    /// `?_mockd_seed` query param, then `X-Mockd-Seed` header, then the
    /// mock's configured `seed` field.
    pub fn resolve_seed(
        query_params: &HashMap<String, String>,
        headers: &HashMap<String, String>,
        response_seed: Option<u64>,
    ) -> Option<u64> {
        if let Some(v) = query_params.get("_mockd_seed") {
            if let Ok(n) = v.parse() {
                return Some(n);
            }
        }
        if let Some(v) = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("x-mockd-seed"))
            .map(|(_, v)| v)
        {
            if let Ok(n) = v.parse() {
                return Some(n);
            }
        }
        response_seed
    }

    /// Build a context with a resolved seed already attached.
    pub fn new(
        method: String,
        path: String,
        query: String,
        headers: HashMap<String, String>,
        body: Option<String>,
        params: HashMap<String, String>,
        mtls_cn: Option<String>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            method,
            path,
            query,
            headers,
            body,
            params,
            mtls_cn,
            seed,
        }
    }

    fn rng(&self) -> ChaCha8Rng {
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        ChaCha8Rng::seed_from_u64(seed)
    }

    fn lookup(&self, path: &str, rng: &mut ChaCha8Rng) -> Option<String> {
        if let Some(rest) = path.strip_prefix("request.") {
            return match rest {
                "method" => Some(self.method.clone()),
                "path" => Some(self.path.clone()),
                "query" => Some(self.query.clone()),
                "body" => self.body.clone(),
                _ => rest
                    .strip_prefix("headers.")
                    .and_then(|h| self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(h)))
                    .map(|(_, v)| v.clone()),
            };
        }
        if let Some(name) = path.strip_prefix("params.") {
            return self.params.get(name).cloned();
        }
        if path == "mtls.cn" {
            return self.mtls_cn.clone();
        }
        if path == "now" {
            return Some(Utc::now().to_rfc3339());
        }
        if let Some(rest) = path.strip_prefix("faker.") {
            return Some(faker_value(rest, rng));
        }
        None
    }

    /// Expand every `{{path}}` tag in `input`, leaving unresolvable tags
    /// untouched so authors can spot typos in the rendered output.
    pub fn expand(&self, input: &str) -> String {
        let mut rng = self.rng();
        TEMPLATE_TAG
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let path = &caps[1];
                self.lookup(path, &mut rng).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

fn faker_value(kind: &str, rng: &mut ChaCha8Rng) -> String {
    match kind {
        "uuid" => {
            let bytes: [u8; 16] = rng.random();
            Uuid::from_bytes(bytes).to_string()
        }
        "int" => rng.random_range(0..1_000_000).to_string(),
        "bool" => rng.random_bool(0.5).to_string(),
        "word" => {
            const WORDS: &[&str] = &["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];
            WORDS[rng.random_range(0..WORDS.len())].to_string()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(seed: Option<u64>) -> TemplateContext {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        TemplateContext::new(
            "GET".into(),
            "/users/42".into(),
            String::new(),
            HashMap::new(),
            None,
            params,
            None,
            seed,
        )
    }

    #[test]
    fn expands_request_and_param_tags() {
        let c = ctx(Some(1));
        assert_eq!(c.expand("{{request.method}} {{params.id}}"), "GET 42");
    }

    #[test]
    fn unresolvable_tag_is_left_untouched() {
        let c = ctx(Some(1));
        assert_eq!(c.expand("{{nope.nope}}"), "{{nope.nope}}");
    }

    #[test]
    fn same_seed_yields_identical_faker_output() {
        let a = ctx(Some(7)).expand("{{faker.uuid}}");
        let b = ctx(Some(7)).expand("{{faker.uuid}}");
        assert_eq!(a, b);
    }

    #[test]
    fn seed_precedence_query_over_header_over_response() {
        let mut q = HashMap::new();
        q.insert("_mockd_seed".to_string(), "1".to_string());
        let mut h = HashMap::new();
        h.insert("X-Mockd-Seed".to_string(), "2".to_string());
        assert_eq!(TemplateContext::resolve_seed(&q, &h, Some(3)), Some(1));

        let empty_q = HashMap::new();
        assert_eq!(TemplateContext::resolve_seed(&empty_q, &h, Some(3)), Some(2));
        assert_eq!(TemplateContext::resolve_seed(&empty_q, &HashMap::new(), Some(3)), Some(3));
    }
}
