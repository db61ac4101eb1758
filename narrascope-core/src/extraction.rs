//! Claim extraction: locating numeric assertions in narrative text.
//!
//! Each tracked [`Metric`] owns an ordered list of [`ClaimMatcher`] strategies.
//! The first matcher that finds a value wins. Adding a metric phrasing means
//! adding a matcher to the table; the scorers never scan text for claims directly.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::trace;

use crate::config::ScoringConfig;
use crate::types::{GroundTruthContext, Metric};

/// A strategy that locates one claimed value for a metric.
pub trait ClaimMatcher: Send + Sync {
    /// Return the first claimed value found in `text`, if any.
    fn find(&self, text: &str) -> Option<f64>;
    /// Short human-readable description of the phrasing this matcher covers.
    fn describe(&self) -> &str;
}

/// Regex-backed matcher. Capture group 1 holds the number.
pub struct RegexMatcher {
    regex: Regex,
    label: String,
    /// Multiplier applied to the captured value (-1.0 for "underperformed by").
    sign: f64,
    /// When false, a capture immediately followed by `%` is skipped.
    allow_percent: bool,
}

impl RegexMatcher {
    /// Compile a case-insensitive matcher.
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(&format!("(?i){pattern}"))?,
            label: label.into(),
            sign: 1.0,
            allow_percent: true,
        })
    }

    pub fn negated(mut self) -> Self {
        self.sign = -1.0;
        self
    }

    pub fn rejecting_percent(mut self) -> Self {
        self.allow_percent = false;
        self
    }
}

impl ClaimMatcher for RegexMatcher {
    fn find(&self, text: &str) -> Option<f64> {
        for caps in self.regex.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            if !self.allow_percent && text[m.end()..].trim_start().starts_with('%') {
                continue;
            }
            if let Ok(value) = m.as_str().replace(',', "").parse::<f64>() {
                return Some(self.sign * value);
            }
        }
        None
    }

    fn describe(&self) -> &str {
        &self.label
    }
}

/// A claim found in the narrative and checked against the context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub metric: Metric,
    pub claimed: f64,
    pub expected: f64,
    pub accurate: bool,
}

/// True when `claimed` lies within `tolerance` (a fraction) of `expected`.
pub fn within_tolerance(claimed: f64, expected: f64, tolerance: f64) -> bool {
    (claimed - expected).abs() <= tolerance * expected.abs()
}

/// Extracts and verifies numeric claims.
pub struct ClaimExtractor {
    table: Vec<(Metric, Vec<Box<dyn ClaimMatcher>>)>,
    /// Default tolerance, as a fraction of the expected value.
    tolerance: f64,
    /// Tolerance for price-like metrics, as a fraction.
    price_tolerance: f64,
}

impl ClaimExtractor {
    /// Build an extractor with the built-in pattern table.
    ///
    /// Tolerances are given in percent (2.0 means ±2%).
    pub fn new(tolerance_pct: f64, price_tolerance_pct: f64) -> Self {
        let table = Metric::ALL
            .iter()
            .map(|metric| (*metric, default_matchers(*metric)))
            .collect();
        Self {
            table,
            tolerance: tolerance_pct / 100.0,
            price_tolerance: price_tolerance_pct / 100.0,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(config.tolerance_pct, config.price_tolerance_pct)
    }

    /// Append a matcher after the built-in ones for `metric`.
    pub fn with_matcher(mut self, metric: Metric, matcher: Box<dyn ClaimMatcher>) -> Self {
        match self.table.iter_mut().find(|(m, _)| *m == metric) {
            Some((_, matchers)) => matchers.push(matcher),
            None => self.table.push((metric, vec![matcher])),
        }
        self
    }

    /// Tolerance fraction applied to `metric`.
    pub fn tolerance_for(&self, metric: Metric) -> f64 {
        if metric.is_price_like() {
            self.price_tolerance
        } else {
            self.tolerance
        }
    }

    /// First claimed value for `metric`, trying matchers in order.
    pub fn find_claim(&self, text: &str, metric: Metric) -> Option<f64> {
        self.table
            .iter()
            .filter(|(m, _)| *m == metric)
            .flat_map(|(_, matchers)| matchers.iter())
            .find_map(|matcher| {
                let value = matcher.find(text)?;
                trace!(metric = metric.key(), matcher = matcher.describe(), value, "Claim matched");
                Some(value)
            })
    }

    /// Find a claim for `metric` and compare it with `expected`.
    ///
    /// `None` means no claim was made, which is not a violation by itself.
    pub fn extract(&self, text: &str, metric: Metric, expected: f64) -> Option<Claim> {
        let claimed = self.find_claim(text, metric)?;
        Some(Claim {
            metric,
            claimed,
            expected,
            accurate: within_tolerance(claimed, expected, self.tolerance_for(metric)),
        })
    }

    /// Check every tracked metric the context has a value for.
    pub fn extract_all(&self, text: &str, context: &GroundTruthContext) -> Vec<Claim> {
        Metric::ALL
            .iter()
            .filter_map(|metric| {
                let expected = context.indicator(*metric)?;
                self.extract(text, *metric, expected)
            })
            .collect()
    }
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

const NUM: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";
const SIGNED: &str = r"([+-]?\d+(?:\.\d+)?)";

fn default_matchers(metric: Metric) -> Vec<Box<dyn ClaimMatcher>> {
    let specs: Vec<(&str, String, bool, bool)> = match metric {
        Metric::Uncertainty => vec![
            (
                "uncertainty <n>",
                format!(
                    r"uncertainty(?:\s+(?:index|score|level|reading))?\s*(?:stands at|of|is|at|was|[:=])?\s*{NUM}"
                ),
                false,
                true,
            ),
            (
                "不确定性 <n>",
                format!(r"不确定性(?:指数|得分|水平)?\s*(?:为|是|达到|[:：])?\s*{NUM}"),
                false,
                true,
            ),
        ],
        Metric::Volatility => vec![
            (
                "volatility <n>%",
                format!(
                    r"volatility\s*(?:stands at|of|is|at|was|near|around|[:=])?\s*(?:about\s+|roughly\s+)?{NUM}\s*%"
                ),
                false,
                true,
            ),
            (
                "<n>% volatility",
                format!(
                    r"{NUM}\s*%\s+(?:annuali[sz]ed\s+|implied\s+|historical\s+|realized\s+)?volatility"
                ),
                false,
                true,
            ),
            (
                "波动率 <n>%",
                format!(r"波动率\s*(?:为|是|达到|[:：])?\s*{NUM}\s*%?"),
                false,
                true,
            ),
        ],
        Metric::RelativeStrength => vec![
            (
                "outperformed the benchmark by <n>%",
                format!(
                    r"outperform(?:ed|ing|s)?\s+(?:the\s+)?(?:benchmark|index|market|s&p\s*500)\s+by\s+{SIGNED}\s*%"
                ),
                false,
                true,
            ),
            (
                "underperformed the benchmark by <n>%",
                format!(
                    r"underperform(?:ed|ing|s)?\s+(?:the\s+)?(?:benchmark|index|market|s&p\s*500)\s+by\s+{SIGNED}\s*%"
                ),
                true,
                true,
            ),
            (
                "<n>% vs the benchmark",
                format!(
                    r"{SIGNED}\s*%\s+(?:vs\.?|versus|relative to|against)\s+(?:the\s+)?(?:benchmark|index|market)"
                ),
                false,
                true,
            ),
            (
                "relative strength <n>%",
                format!(
                    r"(?:relative strength|vs\.?\s+(?:the\s+)?benchmark|relative to (?:the\s+)?benchmark)\s*(?:of|is|at|[:=])?\s*{SIGNED}\s*%"
                ),
                false,
                true,
            ),
            (
                "相对大盘 <n>%",
                format!(r"相对(?:大盘|基准|指数)\s*(?:为|[:：])?\s*{SIGNED}\s*%"),
                false,
                true,
            ),
        ],
        Metric::VolumeRatio => vec![
            (
                "volume ratio <n>",
                format!(r"volume\s+ratio\s*(?:of|is|at|was|[:=])?\s*{NUM}"),
                false,
                true,
            ),
            (
                "<n>x average volume",
                format!(
                    r"{NUM}\s*(?:x|times)\s+(?:the\s+)?(?:average|normal|usual|typical)\s+(?:daily\s+)?volume"
                ),
                false,
                true,
            ),
            (
                "量比 <n>",
                format!(r"量比\s*(?:为|是|[:：])?\s*{NUM}"),
                false,
                true,
            ),
        ],
        Metric::Momentum => vec![
            (
                "RSI <n>",
                format!(
                    r"\brsi(?:\s*\(\s*14\s*\))?(?:\s+(?:reading|value|level))?\s*(?:sits at|stands at|of|is|at|was|near|[:=：为])?\s*{NUM}"
                ),
                false,
                false,
            ),
            (
                "momentum <n>",
                format!(
                    r"momentum(?:\s+(?:indicator|value|reading|score|oscillator))?\s*(?:stands at|of|is|at|was|[:=])?\s*{NUM}"
                ),
                false,
                false,
            ),
            (
                "动量 <n>",
                format!(r"动量(?:指标)?\s*(?:为|是|[:：])?\s*{NUM}"),
                false,
                false,
            ),
        ],
        Metric::Price => vec![
            (
                "price <n>",
                format!(
                    r"(?:price|closed at|close of|closing at|trading at|trades at|last traded at)\s*(?:of|is|was|at|near|around|[:=])?\s*(?:us)?\$?\s*{NUM}"
                ),
                false,
                false,
            ),
            (
                "股价 <n>",
                format!(r"(?:股价|收盘价|现价|价格)\s*(?:为|是|报|[:：])?\s*{NUM}\s*元?"),
                false,
                false,
            ),
        ],
    };

    specs
        .into_iter()
        .map(|(label, pattern, negate, allow_percent)| {
            let mut matcher = RegexMatcher::new(label, &pattern).expect("static claim pattern");
            if negate {
                matcher = matcher.negated();
            }
            if !allow_percent {
                matcher = matcher.rejecting_percent();
            }
            Box::new(matcher) as Box<dyn ClaimMatcher>
        })
        .collect()
}

static PERCENTILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)percentile(?:\s+rank)?\s*(?:of|at|is|[:=])?\s*(\d{1,3}(?:\.\d+)?)(?-u:\b)\s*%?|(?-u:\b)(\d{1,3}(?:\.\d+)?)(?:st|nd|rd|th)?\s*%?[\s-]*percentile|百分位\s*(?:为|是|[:：])?\s*(\d{1,3}(?:\.\d+)?)(?-u:\b)\s*%?|(?-u:\b)(\d{1,3}(?:\.\d+)?)\s*%?\s*分位",
    )
    .expect("static regex")
});

/// A percentile value asserted in the narrative.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileMention {
    pub value: f64,
    /// The matched text, for violation messages.
    pub text: String,
    /// Byte offset of the match.
    pub start: usize,
}

/// All percentile mentions ("percentile 88%", "88th percentile", "88th-percentile",
/// "百分位 88%"). Numbers must stand alone, so "1234th percentile" is no mention.
/// Values above 100 are not percentiles and are ignored.
pub fn extract_percentile_mentions(text: &str) -> Vec<PercentileMention> {
    PERCENTILE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let value = caps
                .iter()
                .skip(1)
                .flatten()
                .next()?
                .as_str()
                .parse::<f64>()
                .ok()?;
            (value <= 100.0).then(|| PercentileMention {
                value,
                text: whole.as_str().trim().to_string(),
                start: whole.start(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn extractor() -> ClaimExtractor {
        ClaimExtractor::new(2.0, 0.5)
    }

    #[test]
    fn test_price_and_momentum_claims() {
        let text = "The price of 100.00 held firm while the momentum value of 50 stayed neutral.";
        let ex = extractor();
        let price = ex.extract(text, Metric::Price, 100.0).unwrap();
        assert!(price.accurate);
        assert_eq!(price.claimed, 100.0);
        let momentum = ex.extract(text, Metric::Momentum, 50.0).unwrap();
        assert!(momentum.accurate);
    }

    #[test]
    fn test_absent_claim_is_none() {
        let ex = extractor();
        assert!(ex.extract("No numbers here.", Metric::Volatility, 20.0).is_none());
    }

    #[test]
    fn test_price_tolerance_is_tighter() {
        let ex = extractor();
        // 1% off: inside the 2% band, outside the 0.5% price band.
        let text = "Shares closed at $101.00 and RSI is 50.5";
        assert!(!ex.extract(text, Metric::Price, 100.0).unwrap().accurate);
        assert!(ex.extract(text, Metric::Momentum, 50.0).unwrap().accurate);
    }

    #[test]
    fn test_price_skips_percent_values() {
        let ex = extractor();
        let text = "The price is 3.2% above its average; price: $187.40 at the close.";
        assert_eq!(ex.find_claim(text, Metric::Price), Some(187.40));
    }

    #[test]
    fn test_thousands_separator() {
        let ex = extractor();
        assert_eq!(
            ex.find_claim("trading at $1,234.50 today", Metric::Price),
            Some(1234.50)
        );
    }

    #[test]
    fn test_underperformance_is_negative() {
        let ex = extractor();
        let text = "The stock underperformed the benchmark by 4.1% this month.";
        assert_eq!(ex.find_claim(text, Metric::RelativeStrength), Some(-4.1));
    }

    #[test]
    fn test_volatility_and_volume_phrasings() {
        let ex = extractor();
        assert_eq!(
            ex.find_claim("a 28.5% annualized volatility", Metric::Volatility),
            Some(28.5)
        );
        assert_eq!(
            ex.find_claim("turnover reached 1.8x the average volume", Metric::VolumeRatio),
            Some(1.8)
        );
    }

    #[test]
    fn test_chinese_phrasings() {
        let ex = extractor();
        let text = "当前股价为 25.30 元，波动率为 32%，量比 1.5，不确定性指数 41。";
        assert_eq!(ex.find_claim(text, Metric::Price), Some(25.30));
        assert_eq!(ex.find_claim(text, Metric::Volatility), Some(32.0));
        assert_eq!(ex.find_claim(text, Metric::VolumeRatio), Some(1.5));
        assert_eq!(ex.find_claim(text, Metric::Uncertainty), Some(41.0));
    }

    #[test]
    fn test_custom_matcher_appended() {
        let matcher = RegexMatcher::new("fear gauge <n>", r"fear gauge\s+(\d+)").unwrap();
        assert_eq!(matcher.describe(), "fear gauge <n>");
        let ex = extractor().with_matcher(Metric::Uncertainty, Box::new(matcher));
        assert_eq!(
            ex.find_claim("the fear gauge 37 is calm", Metric::Uncertainty),
            Some(37.0)
        );
        // Built-in phrasings are tried first.
        assert_eq!(
            ex.find_claim("uncertainty is 41 and the fear gauge 37", Metric::Uncertainty),
            Some(41.0)
        );
    }

    #[test]
    fn test_extract_all_only_checks_known_indicators() {
        let ctx = GroundTruthContext {
            indicators: BTreeMap::from([("volatility".to_string(), 25.0)]),
            ..Default::default()
        };
        let claims = extractor().extract_all("Volatility is 30% and RSI is 70.", &ctx);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metric, Metric::Volatility);
        assert!(!claims[0].accurate);
    }

    #[test]
    fn test_percentile_mentions() {
        let mentions = extract_percentile_mentions(
            "Volatility sits at percentile 88%, volume in the 12th percentile, 百分位 45%.",
        );
        let values: Vec<f64> = mentions.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![88.0, 12.0, 45.0]);
    }

    #[test]
    fn test_percentile_numbers_stand_alone() {
        assert!(extract_percentile_mentions("a 1234th percentile move").is_empty());
        assert!(extract_percentile_mentions("percentile of 1234").is_empty());

        let hyphenated = extract_percentile_mentions("Volume hit its 45th-percentile level.");
        assert_eq!(hyphenated.len(), 1);
        assert_eq!(hyphenated[0].value, 45.0);
        assert_eq!(hyphenated[0].text, "45th-percentile");

        let cjk = extract_percentile_mentions("成交量位于80分位");
        assert_eq!(cjk.iter().map(|m| m.value).collect::<Vec<_>>(), vec![80.0]);
    }

    #[test]
    fn test_within_tolerance_boundaries() {
        assert!(within_tolerance(102.0, 100.0, 0.02));
        assert!(!within_tolerance(102.5, 100.0, 0.02));
        assert!(within_tolerance(0.0, 0.0, 0.02));
    }
}
