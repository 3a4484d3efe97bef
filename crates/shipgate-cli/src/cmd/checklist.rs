use crate::output::{print_json, print_table};
use shipgate_core::checklist::ChecklistModel;
use shipgate_core::config::Config;
use shipgate_core::gate;
use shipgate_core::service::StoryService;

/// Show a story's pre-deployment checklist as the gate will see it.
pub fn run(config: &Config, story: &str, json: bool) -> anyhow::Result<()> {
    let service = super::service(config)?;
    let items = super::block_on(service.checklist(story))?;

    let mut model = ChecklistModel::new(story);
    model.initialize(items)?;
    let (done, total) = model.progress();
    let blocking: Vec<&str> = gate::blocking_items(&model)
        .into_iter()
        .map(|i| i.id.as_str())
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "story_id": story,
            "items": model.items(),
            "done": done,
            "total": total,
            "can_proceed": blocking.is_empty(),
            "blocking": blocking,
        }));
    }

    if model.is_empty() {
        println!("No checklist items for {story}; the gate is open.");
        return Ok(());
    }
    let rows = model
        .items()
        .iter()
        .map(|i| {
            vec![
                i.id.clone(),
                if i.required { "yes" } else { "no" }.to_string(),
                i.label.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "REQUIRED", "ITEM"], rows);
    println!("\n{done}/{total} complete");
    if !blocking.is_empty() {
        println!("Required before deploying: {}", blocking.join(", "));
    }
    Ok(())
}
