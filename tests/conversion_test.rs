//! End-to-end conversion through the public API.

mod common;

use common::*;
use pinecast::domain::ast::{Direction, InputValue, StrategyCallKind};
use pinecast::domain::complexity::Route;
use pinecast::domain::converter::{ConversionOutcome, Rejection, RuleBasedConverter};
use pinecast::domain::parser::parse_source;
use pinecast::domain::registry::lookup;
use proptest::prelude::*;

fn convert(source: &str) -> ConversionOutcome {
    RuleBasedConverter::default().convert(source).unwrap()
}

mod end_to_end {
    use super::*;

    #[test]
    fn simple_indicator_converts() {
        let script = parse_source(SMA_INDICATOR).unwrap();
        assert!(script.complexity_score() < 0.05);
        assert_eq!(script.inputs().len(), 1);
        assert_eq!(script.inputs()[0].name, "len");
        assert_eq!(script.inputs()[0].default, InputValue::Int(20));
        assert_eq!(script.indicators_used().len(), 1);
        assert!(script.indicators_used().contains("ta.sma"));

        let ConversionOutcome::Converted(c) = convert(SMA_INDICATOR) else {
            panic!("expected conversion");
        };
        assert_eq!(c.route, Route::Mechanical);
        assert!(c.source_text.contains("let ma = ta::sma(&close, ops::length(params.len));"));
        assert!(syn::parse_file(&c.source_text).is_ok());
    }

    #[test]
    fn busy_script_is_rejected_on_complexity() {
        let source = busy_script();
        let script = parse_source(&source).unwrap();
        assert_eq!(script.functions().len(), 2);
        assert_eq!(script.indicators_used().len(), 4);
        assert_eq!(script.max_nesting_depth(), 2);
        let score = script.complexity_score();
        assert!((0.5..=0.7).contains(&score), "score {score}");

        match convert(&source) {
            ConversionOutcome::Rejected(Rejection::Complexity(c)) => {
                assert_eq!(c.score, score);
                assert_eq!(c.threshold, 0.3);
                assert_eq!(c.factors.nesting, 2.0 / 3.0);
            }
            other => panic!("expected complexity rejection, got {other:?}"),
        }
        let analysis = RuleBasedConverter::default().analyze(&source).unwrap();
        assert_eq!(analysis.route, Route::Hybrid);
    }

    #[test]
    fn crossover_and_comparison_keep_precedence() {
        let ConversionOutcome::Converted(c) = convert(RSI_FILTERED_ENTRY) else {
            panic!("expected conversion");
        };
        assert!(
            c.source_text.contains(
                "let cross_condition = ops::and(ta::crossover(&fast_ma, &slow_ma), ops::lt(&rsi, 70.0));"
            ),
            "{}",
            c.source_text
        );
    }

    #[test]
    fn unknown_indicator_is_not_passed_through() {
        match convert(UNKNOWN_INDICATOR) {
            ConversionOutcome::Rejected(Rejection::Unsupported(u)) => {
                assert_eq!(u.description, "unknown indicator `ta.notreal`");
                assert_eq!(u.span.line, 3);
            }
            other => panic!("expected unsupported construct, got {other:?}"),
        }
    }

    #[test]
    fn strategy_entry_when_is_resolved() {
        let script = parse_source(RSI_FILTERED_ENTRY).unwrap();
        let call = &script.strategy_calls()[0];
        assert_eq!(call.kind, StrategyCallKind::Entry);
        assert_eq!(call.id.as_deref(), Some("Long"));
        assert_eq!(call.direction, Some(Direction::Long));
        assert_eq!(script.text(call.when.unwrap()), "crossCondition");

        let ConversionOutcome::Converted(c) = convert(RSI_FILTERED_ENTRY) else {
            panic!("expected conversion");
        };
        let text = &c.source_text;
        assert!(text.contains("let when_0 = &cross_condition;"), "{text}");
        assert!(text.contains("if ops::truthy(&when_0, idx) {"));
        assert!(text.contains("out.order(Order::entry(\"Long\", Direction::Long, idx));"));
    }
}

mod rejections {
    use super::*;

    fn reason(source: &str) -> &'static str {
        match convert(source) {
            ConversionOutcome::Rejected(r) => r.reason(),
            ConversionOutcome::Converted(_) => "converted",
        }
    }

    #[test]
    fn missing_header_is_syntax() {
        assert_eq!(reason("ma = ta.sma(close, 10)\n"), "syntax");
        assert_eq!(reason("//@version=5\nma = ta.sma(close, 10)\n"), "syntax");
    }

    #[test]
    fn multi_output_must_be_destructured() {
        let source = "//@version=5\nindicator(\"M\")\nm = ta.macd(close, 12, 26, 9)\n";
        assert_eq!(reason(source), "unsupported");
        let source = "//@version=5\nindicator(\"M\")\n[m, s, h] = ta.macd(close, 12, 26, 9)\nplot(h)\n";
        assert_eq!(reason(source), "converted");
    }

    #[test]
    fn drawing_only_warns() {
        let source = "//@version=5\nindicator(\"D\")\nline.new(bar_index, high, bar_index, low)\nplot(close)\n";
        let ConversionOutcome::Converted(c) = convert(source) else {
            panic!("expected conversion");
        };
        assert_eq!(c.warnings.len(), 1);
        assert_eq!(c.warnings[0].line, 3);
    }
}

proptest! {
    #[test]
    fn rejection_is_idempotent(name in "[a-z]{3,10}") {
        prop_assume!(lookup(&format!("ta.{}", name)).is_none());
        let source = format!("//@version=5\nindicator(\"P\")\nx = ta.{}(close, 5)\nplot(x)\n", name);
        let converter = RuleBasedConverter::default();
        let first = converter.convert(&source).unwrap();
        let second = converter.convert(&source).unwrap();
        prop_assert!(!first.is_converted());
        prop_assert_eq!(first, second);
    }
}
