use crate::output::{print_json, print_table, truncate};
use shipgate_core::config::Config;
use shipgate_core::service::StoryService;

pub fn run(config: &Config, story: &str, json: bool) -> anyhow::Result<()> {
    let service = super::service(config)?;
    let report = super::block_on(service.impact(story))?;

    if json {
        return print_json(&report);
    }

    println!("Story:   {}", report.story_number);
    if let Some(branch) = &report.suggested_branch_name {
        println!("Branch:  {branch}");
    }
    println!(
        "Risk:    {} ({}/10)",
        report.overall_risk_level, report.overall_risk_score
    );
    if !report.overall_summary.is_empty() {
        println!("\n{}", report.overall_summary);
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for f in &report.frontend_impacts {
        rows.push(vec![
            "frontend".into(),
            f.component_name.clone(),
            f.risk_score.to_string(),
            truncate(&f.reason, 60),
        ]);
    }
    for b in &report.backend_impacts {
        rows.push(vec![
            "backend".into(),
            b.service_name.clone(),
            b.risk_score.to_string(),
            truncate(&b.reason, 60),
        ]);
    }
    for c in &report.cross_service_risks {
        rows.push(vec![
            "cross-service".into(),
            format!("{} → {}", c.from_service, c.to_service),
            c.risk_score.to_string(),
            truncate(&c.reason, 60),
        ]);
    }
    if !rows.is_empty() {
        println!();
        print_table(&["AREA", "COMPONENT", "RISK", "REASON"], rows);
    }

    let items = report.test_items();
    if !items.is_empty() {
        println!();
        let rows = items
            .into_iter()
            .map(|i| vec![i.kind.to_string(), i.id, truncate(&i.label, 60)])
            .collect();
        print_table(&["KIND", "ID", "TEST"], rows);
    }
    Ok(())
}
