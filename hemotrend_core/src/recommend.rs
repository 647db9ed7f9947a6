//! Rule-based recommendations derived from risk assessments and the
//! transfusion prediction.
//!
//! Rules are evaluated in table order. When two rules produce the same
//! title, the later rule's entry replaces the earlier one. The final list
//! is sorted by priority, then confidence, then title.

use crate::risk::{FACTOR_LIVER_ENZYMES, FACTOR_MONITORING_GAPS};
use crate::{
    PredictionStatus, Priority, Recommendation, RiskAssessment, RiskDomain, RiskLevel,
    Sufficiency, TransfusionPrediction,
};

/// Inputs every rule sees
pub struct RuleContext<'a> {
    pub assessments: &'a [RiskAssessment],
    pub prediction: &'a TransfusionPrediction,
}

impl<'a> RuleContext<'a> {
    fn domain(&self, domain: RiskDomain) -> Option<&'a RiskAssessment> {
        self.assessments
            .iter()
            .find(|a| a.domain == domain && a.has_data())
    }

    fn level(&self, domain: RiskDomain) -> Option<RiskLevel> {
        self.domain(domain).map(|a| a.level)
    }

    fn score(&self, domain: RiskDomain) -> u8 {
        self.domain(domain).map(|a| a.score).unwrap_or(0)
    }

    /// Whether a factor has a positive value, whether or not it was reported
    fn factor_present(&self, domain: RiskDomain, label: &str) -> bool {
        self.domain(domain)
            .and_then(|a| a.factor_value(label))
            .is_some_and(|v| v > 0.0)
    }
}

/// Draft produced by a rule; the rule name is attached by the engine
struct Draft {
    title: &'static str,
    priority: Priority,
    description: String,
    suggested_action: &'static str,
    confidence: u8,
}

pub struct Rule {
    pub name: &'static str,
    applies: fn(&RuleContext) -> bool,
    build: fn(&RuleContext) -> Draft,
}

static RULES: &[Rule] = &[
    Rule {
        name: "anemia_critical",
        applies: |ctx| ctx.level(RiskDomain::Anemia) == Some(RiskLevel::Critical),
        build: |ctx| Draft {
            title: "Schedule Blood Transfusion",
            priority: Priority::High,
            description: "Anemia risk is critical. A transfusion is likely needed soon.".into(),
            suggested_action: "Contact your hematologist",
            confidence: ctx.score(RiskDomain::Anemia),
        },
    },
    Rule {
        name: "anemia_high",
        applies: |ctx| ctx.level(RiskDomain::Anemia) == Some(RiskLevel::High),
        build: |ctx| Draft {
            title: "Review Anemia Management",
            priority: Priority::High,
            description: "Hemoglobin is trending toward your transfusion threshold.".into(),
            suggested_action: "Book a review with your care team",
            confidence: ctx.score(RiskDomain::Anemia),
        },
    },
    Rule {
        name: "anemia_medium",
        applies: |ctx| ctx.level(RiskDomain::Anemia) == Some(RiskLevel::Medium),
        build: |ctx| Draft {
            title: "Increase Hemoglobin Monitoring",
            priority: Priority::Medium,
            description: "Anemia risk is elevated. More frequent Hb checks will sharpen the forecast."
                .into(),
            suggested_action: "Check hemoglobin weekly",
            confidence: ctx.score(RiskDomain::Anemia),
        },
    },
    Rule {
        name: "transfusion_due",
        applies: |ctx| {
            matches!(
                ctx.prediction.status,
                PredictionStatus::Predicted | PredictionStatus::BelowThreshold
            )
        },
        build: |ctx| {
            let p = ctx.prediction;
            let description = match (p.status, p.days_until) {
                (PredictionStatus::BelowThreshold, _) => format!(
                    "Hemoglobin is already below your threshold of {} g/dL.",
                    p.threshold
                ),
                (_, Some(days)) => format!(
                    "Hemoglobin is projected to drop below {} g/dL in about {} days.",
                    p.threshold, days
                ),
                _ => format!("Hemoglobin is projected to drop below {} g/dL.", p.threshold),
            };
            Draft {
                title: "Schedule Blood Transfusion",
                priority: Priority::High,
                description,
                suggested_action: "Contact your hematologist",
                confidence: p.confidence,
            }
        },
    },
    Rule {
        name: "transfusion_on_schedule",
        applies: |ctx| ctx.prediction.status == PredictionStatus::NoImminentNeed,
        build: |ctx| Draft {
            title: "Continue Current Transfusion Schedule",
            priority: Priority::Low,
            description: format!(
                "No drop below {} g/dL is projected within the forecast horizon.",
                ctx.prediction.threshold
            ),
            suggested_action: "Keep your planned appointments",
            confidence: ctx.prediction.confidence,
        },
    },
    Rule {
        name: "iron_overload_high",
        applies: |ctx| {
            matches!(
                ctx.level(RiskDomain::IronOverload),
                Some(RiskLevel::High | RiskLevel::Critical)
            )
        },
        build: |ctx| Draft {
            title: "Optimize Chelation Therapy",
            priority: Priority::High,
            description: "Iron overload risk is high. Chelation may need adjusting.".into(),
            suggested_action: "Discuss with your doctor",
            confidence: ctx.score(RiskDomain::IronOverload),
        },
    },
    Rule {
        name: "iron_overload_medium",
        applies: |ctx| ctx.level(RiskDomain::IronOverload) == Some(RiskLevel::Medium),
        build: |ctx| Draft {
            title: "Review Chelation Adherence",
            priority: Priority::Medium,
            description: "Ferritin is above the normal range.".into(),
            suggested_action: "Review your chelation routine",
            confidence: ctx.score(RiskDomain::IronOverload),
        },
    },
    Rule {
        name: "liver_enzymes",
        applies: |ctx| ctx.factor_present(RiskDomain::IronOverload, FACTOR_LIVER_ENZYMES),
        build: |ctx| Draft {
            title: "Liver Function Monitoring",
            priority: Priority::Medium,
            description: "One or more liver enzymes are above the normal range.".into(),
            suggested_action: "Schedule monthly LFTs",
            confidence: ctx.score(RiskDomain::IronOverload),
        },
    },
    Rule {
        name: "dietary_iron",
        applies: |ctx| {
            ctx.level(RiskDomain::IronOverload)
                .is_some_and(|l| l >= RiskLevel::Medium)
        },
        build: |ctx| Draft {
            title: "Dietary Consultation",
            priority: Priority::Low,
            description: "Reducing dietary iron can support chelation.".into(),
            suggested_action: "Meet with nutritionist",
            confidence: ctx.score(RiskDomain::IronOverload),
        },
    },
    Rule {
        name: "cardiac_high",
        applies: |ctx| {
            matches!(
                ctx.level(RiskDomain::Cardiac),
                Some(RiskLevel::High | RiskLevel::Critical)
            )
        },
        build: |ctx| Draft {
            title: "Cardiac Iron Assessment",
            priority: Priority::High,
            description: "Ferritin has been severely elevated for a long period.".into(),
            suggested_action: "Request a cardiac T2* MRI",
            confidence: ctx.score(RiskDomain::Cardiac),
        },
    },
    Rule {
        name: "cardiac_medium",
        applies: |ctx| ctx.level(RiskDomain::Cardiac) == Some(RiskLevel::Medium),
        build: |ctx| Draft {
            title: "Cardiac Monitoring",
            priority: Priority::Medium,
            description: "Cardiac risk from iron loading is elevated.".into(),
            suggested_action: "Schedule an echocardiogram",
            confidence: ctx.score(RiskDomain::Cardiac),
        },
    },
    Rule {
        name: "monitoring_gaps",
        applies: |ctx| ctx.factor_present(RiskDomain::Cardiac, FACTOR_MONITORING_GAPS),
        build: |ctx| Draft {
            title: "Resume Regular Lab Monitoring",
            priority: Priority::Medium,
            description: "There are long gaps between your recent lab results.".into(),
            suggested_action: "Book your next Hb and ferritin labs",
            confidence: ctx.score(RiskDomain::Cardiac),
        },
    },
    Rule {
        name: "baseline_labs",
        applies: |ctx| {
            ctx.prediction.status == PredictionStatus::InsufficientData
                || ctx
                    .assessments
                    .iter()
                    .any(|a| a.sufficiency == Sufficiency::Insufficient)
        },
        build: |ctx| {
            let missing: Vec<&str> = ctx
                .assessments
                .iter()
                .filter(|a| a.sufficiency == Sufficiency::Insufficient)
                .map(|a| domain_name(a.domain))
                .collect();
            let description = if missing.is_empty() {
                "At least two hemoglobin results are needed to forecast transfusions.".into()
            } else {
                format!("Not enough data to assess {} risk.", missing.join(", "))
            };
            Draft {
                title: "Complete Baseline Labs",
                priority: Priority::Medium,
                description,
                suggested_action: "Record recent lab results",
                confidence: 100,
            }
        },
    },
];

fn domain_name(domain: RiskDomain) -> &'static str {
    match domain {
        RiskDomain::Anemia => "anemia",
        RiskDomain::IronOverload => "iron overload",
        RiskDomain::Cardiac => "cardiac",
    }
}

/// The built-in rule table, in evaluation order
pub fn rules() -> &'static [Rule] {
    RULES
}

/// Evaluate every rule against the assessments and prediction
pub fn recommend(
    assessments: &[RiskAssessment],
    prediction: &TransfusionPrediction,
) -> Vec<Recommendation> {
    let ctx = RuleContext {
        assessments,
        prediction,
    };

    let mut out: Vec<Recommendation> = Vec::new();
    for rule in RULES.iter().filter(|r| (r.applies)(&ctx)) {
        let draft = (rule.build)(&ctx);
        let rec = Recommendation {
            title: draft.title.to_string(),
            priority: draft.priority,
            description: draft.description,
            suggested_action: draft.suggested_action.to_string(),
            confidence: draft.confidence.min(100),
            rule: rule.name.to_string(),
        };

        match out.iter_mut().find(|r| r.title == rec.title) {
            Some(existing) => {
                tracing::debug!("Rule {} supersedes {}", rule.name, existing.rule);
                *existing = rec;
            }
            None => out.push(rec),
        }
    }

    out.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.confidence.cmp(&a.confidence))
            .then_with(|| a.title.cmp(&b.title))
    });
    out
}
