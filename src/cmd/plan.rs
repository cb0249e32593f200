//! Execution plan preview.

use anyhow::Result;
use std::path::Path;

use anvil::dag;

pub fn cmd_plan(project_dir: &Path, spec: &Path, json: bool) -> Result<()> {
    let text = super::read_spec(project_dir, spec)?;
    let (graph, plan) = dag::plan(&text)?;

    if json {
        println!("{}", serde_json::to_string_pretty(plan.levels())?);
        return Ok(());
    }

    println!(
        "{} component(s) in {} level(s)",
        plan.component_count(),
        plan.len()
    );
    for (level, ids) in plan.iter() {
        println!();
        println!("Level {}:", level);
        for id in ids {
            match graph.get_by_id(id) {
                Some(component) if !component.depends_on.is_empty() => println!(
                    "  {:<20} {:<30} after {}",
                    id,
                    component.file,
                    component.depends_on.join(", ")
                ),
                Some(component) => println!("  {:<20} {}", id, component.file),
                None => println!("  {}", id),
            }
        }
    }
    Ok(())
}
