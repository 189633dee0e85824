//! Built-in workflow template catalog and customization.
//!
//! The catalog is read-only once built. `customize` never touches the shared
//! templates: it deep-clones the requested template, applies the overrides to
//! the copy and re-validates the copy's dependency graph.

use std::sync::{Arc, OnceLock};

use serde_json::json;

use insightflow_types::error::WorkflowError;
use insightflow_types::workflow::{
    Customization, StepDefinition, StepKind, TemplateSummary, WorkflowTemplate,
};

use super::dag::build_dependency_graph;

/// Ordered, validated set of workflow templates.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateCatalog {
    templates: Vec<WorkflowTemplate>,
}

impl TemplateCatalog {
    /// Build a catalog, validating every template's dependency graph.
    pub fn new(templates: Vec<WorkflowTemplate>) -> Result<Self, WorkflowError> {
        for (i, template) in templates.iter().enumerate() {
            if templates[..i].iter().any(|t| t.id == template.id) {
                return Err(WorkflowError::ValidationError(format!(
                    "duplicate template ID: '{}'",
                    template.id
                )));
            }
            if template.steps.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "template '{}' has no steps",
                    template.id
                )));
            }
            build_dependency_graph(&template.steps)?;
        }
        Ok(Self { templates })
    }

    /// The process-wide built-in catalog, initialized on first use.
    pub fn builtin() -> Arc<TemplateCatalog> {
        static BUILTIN: OnceLock<Arc<TemplateCatalog>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| {
                Arc::new(TemplateCatalog {
                    templates: builtin_templates(),
                })
            })
            .clone()
    }

    pub fn get(&self, template_id: &str) -> Option<&WorkflowTemplate> {
        self.templates.iter().find(|t| t.id == template_id)
    }

    pub fn templates(&self) -> &[WorkflowTemplate] {
        &self.templates
    }

    /// Catalog listing in catalog order.
    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.templates.iter().map(WorkflowTemplate::summary).collect()
    }

    /// Deep copy of a template with overrides applied.
    ///
    /// Step parameters are merged key by key; `depends_on` overrides replace
    /// the dependency list. Overrides naming a step the template lacks are
    /// rejected, as is any override that breaks the dependency graph.
    pub fn customize(
        &self,
        template_id: &str,
        customization: &Customization,
    ) -> Result<WorkflowTemplate, WorkflowError> {
        let mut template = self
            .get(template_id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownTemplate(template_id.to_string()))?;

        if let Some(overrides) = &customization.workflow {
            if let Some(name) = &overrides.name {
                template.name = name.clone();
            }
            if let Some(description) = &overrides.description {
                template.description = description.clone();
            }
        }

        // Sorted so the first reported unknown step is deterministic.
        let mut step_ids: Vec<&String> = customization.steps.keys().collect();
        step_ids.sort();
        for step_id in step_ids {
            let over = &customization.steps[step_id];
            let step = template
                .step_mut(step_id)
                .ok_or_else(|| WorkflowError::UnknownStep {
                    template: template_id.to_string(),
                    step: step_id.clone(),
                })?;
            for (key, value) in &over.parameters {
                step.parameters.insert(key.clone(), value.clone());
            }
            if let Some(deps) = &over.depends_on {
                step.depends_on = deps.clone();
            }
        }

        build_dependency_graph(&template.steps)?;
        tracing::debug!(
            template_id,
            overridden_steps = customization.steps.len(),
            "customized template"
        );
        Ok(template)
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        TemplateCatalog::builtin().as_ref().clone()
    }
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        conversion_analysis(),
        feature_usage_analysis(),
        revenue_analysis(),
    ]
}

fn conversion_analysis() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "conversion_analysis".to_string(),
        name: "Conversion Deep Dive".to_string(),
        description: "Funnel and segment conversion with significance testing".to_string(),
        steps: vec![
            StepDefinition::new("funnel_query", StepKind::Query, "Funnel stages")
                .with_description("Users and conversions per funnel stage")
                .with_param("model", json!("conversion_funnel"))
                .with_param("dimensions", json!(["stage"]))
                .with_param("measures", json!(["users", "conversions", "conversion_rate"]))
                .with_param("filters", json!({"period": "last_30_days"}))
                .with_param("limit", json!(500)),
            StepDefinition::new("segment_query", StepKind::Query, "Segment conversion")
                .with_description("Conversion broken down by customer segment")
                .with_param("model", json!("conversion_segments"))
                .with_param("dimensions", json!(["segment"]))
                .with_param("measures", json!(["sessions", "conversions", "conversion_rate"]))
                .with_param("limit", json!(500)),
            StepDefinition::new("significance_test", StepKind::StatisticalTest, "Significance test")
                .with_description("Is the conversion gap between segments real?")
                .with_param("comparison_type", json!("conversion_rate"))
                .with_param("dimensions", json!(["segment"]))
                .with_param("measures", json!(["conversion_rate"]))
                .depends_on(["funnel_query", "segment_query"]),
            StepDefinition::new("segment_comparison", StepKind::Comparison, "Segment comparison")
                .with_param("measure", json!("conversion_rate"))
                .with_param("group_by", json!(["segment"]))
                .depends_on(["segment_query"]),
            StepDefinition::new("conversion_insights", StepKind::InsightGeneration, "Conversion insights")
                .with_param("focus_areas", json!(["conversion", "segment"]))
                .with_param("max_insights", json!(5))
                .depends_on([
                    "funnel_query",
                    "segment_query",
                    "significance_test",
                    "segment_comparison",
                ]),
        ],
        estimated_duration: "1-2 minutes".to_string(),
        use_cases: vec![
            "Why did conversion drop last month?".to_string(),
            "Which segments convert best?".to_string(),
        ],
    }
}

fn feature_usage_analysis() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "feature_usage_analysis".to_string(),
        name: "Feature Adoption".to_string(),
        description: "Feature usage, retention correlation and expansion candidates".to_string(),
        steps: vec![
            StepDefinition::new("usage_query", StepKind::Query, "Feature usage")
                .with_param("model", json!("feature_usage"))
                .with_param("dimensions", json!(["feature", "segment"]))
                .with_param("measures", json!(["active_users", "sessions", "exports"]))
                .with_param("limit", json!(1000)),
            StepDefinition::new("retention_query", StepKind::Query, "Retention")
                .with_param("model", json!("retention_cohorts"))
                .with_param("dimensions", json!(["segment"]))
                .with_param("measures", json!(["retained_users", "retention_rate"]))
                .with_param("limit", json!(1000)),
            StepDefinition::new("usage_correlation", StepKind::Analysis, "Usage correlation")
                .with_description("Which usage signals move together?")
                .with_param("analysis_type", json!("correlation"))
                .depends_on(["usage_query", "retention_query"]),
            StepDefinition::new("expansion_scan", StepKind::Analysis, "Expansion scan")
                .with_description("Segments with outsized adoption")
                .with_param("analysis_type", json!("expansion_opportunities"))
                .with_param("measure", json!("active_users"))
                .with_param("group_by", json!(["segment"]))
                .depends_on(["usage_query"]),
            StepDefinition::new("feature_insights", StepKind::InsightGeneration, "Adoption insights")
                .with_param("focus_areas", json!(["adoption", "retention"]))
                .depends_on([
                    "usage_query",
                    "retention_query",
                    "usage_correlation",
                    "expansion_scan",
                ]),
        ],
        estimated_duration: "2-3 minutes".to_string(),
        use_cases: vec![
            "Which features drive retention?".to_string(),
            "Where should we push upsell?".to_string(),
        ],
    }
}

fn revenue_analysis() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "revenue_analysis".to_string(),
        name: "Revenue Breakdown".to_string(),
        description: "MRR rollups and plan-level comparison".to_string(),
        steps: vec![
            StepDefinition::new("revenue_query", StepKind::Query, "Revenue by plan")
                .with_param("model", json!("revenue"))
                .with_param("dimensions", json!(["plan", "region"]))
                .with_param("measures", json!(["mrr", "seats", "accounts"]))
                .with_param("limit", json!(1000)),
            StepDefinition::new("revenue_rollup", StepKind::Aggregation, "Revenue rollup")
                .with_param("measures", json!(["mrr", "seats"]))
                .with_param("group_by", json!(["plan"]))
                .depends_on(["revenue_query"]),
            StepDefinition::new("plan_comparison", StepKind::Comparison, "Plan comparison")
                .with_param("measure", json!("mrr"))
                .with_param("group_by", json!(["plan"]))
                .depends_on(["revenue_query"]),
            StepDefinition::new("revenue_insights", StepKind::InsightGeneration, "Revenue insights")
                .with_param("focus_areas", json!(["revenue", "mrr"]))
                .depends_on(["revenue_query", "revenue_rollup", "plan_comparison"]),
        ],
        estimated_duration: "1 minute".to_string(),
        use_cases: vec![
            "Which plans carry our MRR?".to_string(),
            "How does revenue differ by region?".to_string(),
        ],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use insightflow_types::workflow::{StepOverride, WorkflowOverrides};

    #[test]
    fn test_builtin_templates_validate() {
        let catalog = TemplateCatalog::new(builtin_templates()).unwrap();
        assert_eq!(catalog.templates().len(), 3);
        assert_eq!(&catalog, TemplateCatalog::builtin().as_ref());
    }

    #[test]
    fn test_insight_step_depends_on_every_other_step() {
        for template in TemplateCatalog::builtin().templates() {
            let last = template.steps.last().unwrap();
            assert_eq!(last.kind, StepKind::InsightGeneration, "{}", template.id);
            let others: Vec<&str> = template.steps[..template.steps.len() - 1]
                .iter()
                .map(|s| s.id.as_str())
                .collect();
            assert_eq!(last.depends_on, others, "{}", template.id);
            assert!((4..=5).contains(&template.steps.len()));
            assert!(template.step_kinds().len() >= 3);
        }
    }

    #[test]
    fn test_list_templates_is_stable() {
        let catalog = TemplateCatalog::builtin();
        let first = catalog.list_templates();
        let second = catalog.list_templates();
        assert_eq!(first, second);
        assert_eq!(first[0].id, "conversion_analysis");
        assert_eq!(first[0].step_count, 5);
        assert_eq!(
            first[2].step_kinds,
            vec![
                StepKind::Query,
                StepKind::Aggregation,
                StepKind::Comparison,
                StepKind::InsightGeneration
            ]
        );
    }

    #[test]
    fn test_customize_merges_params_without_touching_catalog() {
        let catalog = TemplateCatalog::builtin();
        let custom = Customization::default().set_param("segment_query", "limit", json!(100));

        let copy = catalog.customize("conversion_analysis", &custom).unwrap();
        let step = copy.step("segment_query").unwrap();
        assert_eq!(step.parameters["limit"], json!(100));
        assert_eq!(step.parameters["model"], json!("conversion_segments"));

        let original = catalog.get("conversion_analysis").unwrap();
        assert_eq!(original.step("segment_query").unwrap().parameters["limit"], json!(500));
    }

    #[test]
    fn test_customize_workflow_fields() {
        let custom = Customization {
            workflow: Some(WorkflowOverrides {
                name: Some("Q3 revenue".to_string()),
                description: None,
            }),
            ..Customization::default()
        };
        let copy = TemplateCatalog::builtin()
            .customize("revenue_analysis", &custom)
            .unwrap();
        assert_eq!(copy.name, "Q3 revenue");
        assert_eq!(copy.description, "MRR rollups and plan-level comparison");
    }

    #[test]
    fn test_customize_unknown_template() {
        let err = TemplateCatalog::builtin()
            .customize("nope", &Customization::default())
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnknownTemplate("nope".to_string()));
    }

    #[test]
    fn test_customize_unknown_step() {
        let custom = Customization::default().set_param("ghost", "limit", json!(1));
        let err = TemplateCatalog::builtin()
            .customize("revenue_analysis", &custom)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStep { ref step, .. } if step == "ghost"));
    }

    #[test]
    fn test_customize_rejects_cycle() {
        let mut custom = Customization::default();
        custom.steps.insert(
            "revenue_query".to_string(),
            StepOverride {
                depends_on: Some(vec!["revenue_insights".to_string()]),
                ..StepOverride::default()
            },
        );
        let err = TemplateCatalog::builtin()
            .customize("revenue_analysis", &custom)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CircularDependency { .. }));
    }

    #[test]
    fn test_new_rejects_unknown_dependency() {
        let mut template = conversion_analysis();
        template.steps[0].depends_on = vec!["missing".to_string()];
        let err = TemplateCatalog::new(vec![template]).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency { .. }));
    }

    #[test]
    fn test_new_rejects_duplicate_template_ids() {
        let err = TemplateCatalog::new(vec![revenue_analysis(), revenue_analysis()]).unwrap_err();
        assert!(err.to_string().contains("duplicate template ID"));
    }
}
