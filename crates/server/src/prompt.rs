//! Agent prompt assembly
//!
//! Turns the fetched work item, the prepared workspace and the
//! caller's extra instructions into the single prompt the engine
//! receives.

use crate::ticket::{WorkItem, WorkItemComment};

const MAX_PROMPT_COMMENTS: usize = 5;

/// Build the work prompt for one session.
pub fn work_prompt(item: &WorkItem, repos: &[String], task_context: Option<&str>) -> String {
    let repos_list = if repos.is_empty() {
        "(no repositories were cloned; report that you have nothing to work on)".to_string()
    } else {
        repos
            .iter()
            .map(|r| format!("- ./{r}/"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let custom_section = task_context
        .map(|c| format!("\n## Custom Instructions:\n{c}\n"))
        .unwrap_or_default();

    format!(
        "You are an AI developer working on a ticket.\n\
         \n\
         ## Ticket: {key}\n\
         **Summary:** {summary}\n\
         **Status:** {status}\n\
         **Priority:** {priority}\n\
         **Type:** {issue_type}\n\
         \n\
         **Description:**\n\
         {description}\n\
         \n\
         ## Comments:\n\
         {comments}\n\
         \n\
         ## Your Working Directory:\n\
         The following repositories have been cloned to your current directory:\n\
         {repos_list}\n\
         {custom_section}\n\
         ## Your Task:\n\
         \n\
         1. Transition the ticket to \"In Progress\" (or equivalent status)\n\
         2. Analyze the ticket and understand what needs to be done\n\
         3. Identify the relevant repository and files to modify\n\
         4. Create a new branch with a descriptive name based on the ticket\n\
         5. Implement the changes required by the ticket\n\
         6. Commit your changes with a clear commit message referencing the ticket\n\
         7. Push the branch and open a merge request\n\
         8. Add a comment to the ticket with a summary of what you implemented and \
         a link to the merge request\n\
         9. Transition the ticket to \"Code Review\" (or equivalent status)\n\
         \n\
         Work step by step. If you encounter any issues or the task is unclear, stop \
         and explain what's blocking you rather than pushing incomplete work.\n",
        key = item.key,
        summary = item.summary,
        status = item.status,
        priority = item.priority.as_deref().unwrap_or("None"),
        issue_type = item.issue_type.as_deref().unwrap_or("Task"),
        description = item
            .description
            .as_deref()
            .unwrap_or("No description provided."),
        comments = format_comments(&item.comments),
    )
}

/// Format the most recent comments for the prompt.
fn format_comments(comments: &[WorkItemComment]) -> String {
    if comments.is_empty() {
        return "No comments.".to_string();
    }

    let start = comments.len().saturating_sub(MAX_PROMPT_COMMENTS);
    comments[start..]
        .iter()
        .map(|c| {
            let date = c.created.get(..10).unwrap_or(&c.created);
            format!("**{}** ({}):\n{}\n", c.author, date, c.body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
