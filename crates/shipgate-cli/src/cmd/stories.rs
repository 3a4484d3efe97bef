use crate::output::{print_json, print_table, truncate};
use clap::Subcommand;
use shipgate_core::config::Config;
use shipgate_core::service::StoryService;
use shipgate_core::story::NewStory;

#[derive(Subcommand)]
pub enum StoriesSubcommand {
    /// List stories (the default)
    List,

    /// Register a new story with the analysis service
    Add {
        /// Story number, e.g. US-201
        story_number: String,
        /// Story type, e.g. feature or bugfix
        #[arg(long = "type", default_value = "")]
        story_type: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        acceptance_criteria: String,
        /// Impacted component/service identifier
        #[arg(long = "csi", default_value = "")]
        impacted_csi: String,
    },
}

pub fn run(config: &Config, subcmd: Option<StoriesSubcommand>, json: bool) -> anyhow::Result<()> {
    match subcmd.unwrap_or(StoriesSubcommand::List) {
        StoriesSubcommand::List => list(config, json),
        StoriesSubcommand::Add {
            story_number,
            story_type,
            description,
            acceptance_criteria,
            impacted_csi,
        } => add(
            config,
            NewStory {
                story_number,
                story_type,
                description,
                acceptance_criteria,
                impacted_csi,
            },
            json,
        ),
    }
}

fn list(config: &Config, json: bool) -> anyhow::Result<()> {
    let service = super::service(config)?;
    let stories = super::block_on(service.list_stories())?;

    if json {
        return print_json(&stories);
    }
    if stories.is_empty() {
        println!("No stories.");
        return Ok(());
    }
    let rows = stories
        .iter()
        .map(|s| {
            vec![
                s.story_number.clone(),
                s.story_type.clone().unwrap_or_else(|| "-".into()),
                truncate(s.description.as_deref().unwrap_or(""), 60),
            ]
        })
        .collect();
    print_table(&["STORY", "TYPE", "DESCRIPTION"], rows);
    Ok(())
}

fn add(config: &Config, story: NewStory, json: bool) -> anyhow::Result<()> {
    story.validate()?;
    let service = super::service(config)?;
    super::block_on(service.add_story(&story))?;

    if json {
        return print_json(&story);
    }
    println!("Added story {}.", story.story_number);
    Ok(())
}
