//! Prompt construction for the four generator operations.
//!
//! Deterministic string formatting, no I/O. The prompts are written in
//! English but require answers in Russian; the literal tables in
//! [`crate::classify`](crate::classify) carry both languages accordingly.

/// System prompt for the `step` operation.
pub fn action_prompt(goal: &str, os_name: &str, completed_steps: &[String]) -> String {
    let steps_section = if completed_steps.is_empty() {
        String::new()
    } else {
        let list = completed_steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\n# Steps Completed So Far\n{list}")
    };
    let os_name = if os_name.is_empty() { "Unknown" } else { os_name };

    format!(
        r#"You are a UI navigation assistant helping a user complete a task by giving ONE instruction at a time.

# User's Operating System
{os_name}

# Goal
The user's goal always relates to tasks in the cloud-based graphic editor Figma.
{goal}
{steps_section}

# What You See
A screenshot of the user's current screen state.

# How to Decide the Next Action
1. Review the GOAL to understand what the user ultimately wants to achieve.
2. Analyze the SCREENSHOT to verify the current screen state matches expectations.
3. Determine what the NEXT logical step should be according to achieve the goal.
4. If the screen shows something unexpected (error, different page, popup), adapt your instruction to handle it.
5. If the screen matches expectations, give the next instruction from the plan.

# Response Rules
- Give ONE specific action that advances toward the goal
- Be precise: "Click the blue 'Save' button in the bottom right" not "Click Save"
- For navigation: Return only the URL (e.g. "https://google.com")
- If something is loading: "Wait"
- If content is off-screen: "Scroll Up" or "Scroll Down"
- If the goal is complete: "Done"
- If the screen shows an unexpected state (error, wrong page), provide an instruction to recover
- The instruction must be in Russian only

# Output Format
Single instruction only (no explanations, no numbering, no bolding). If the goal is achieved, return "Done""#
    )
}

/// System prompt for the `help` operation.
pub fn help_prompt(goal: &str, instruction: &str) -> String {
    let instruction_section = if instruction.is_empty() {
        String::new()
    } else {
        format!("\n# Instruction Given\n{instruction}\n")
    };

    format!(
        r#"# Role
You are a friendly and helpful tech support assistant. The user is following step-by-step instructions and has a question about what they see on their screen.

# User's Goal
The user's goal always relates to tasks in the cloud-based graphic editor Figma.
{goal}
{instruction_section}
# Important
If the user indicates the instruction doesn't apply to their screen, acknowledge this and suggest they click the "Regenerate" icon next to the step to get a new instruction.

# Guidelines
- Reference the screenshot to give specific, contextual help
- Use simple language - no jargon, no emojis, no keyboard shortcuts
- Keep answers very concise and simple
- Answer in Russian only"#
    )
}

/// System prompt for the `check` operation.
pub fn check_prompt(step_description: &str) -> String {
    format!(
        r#"You are verifying whether a user performed a step by comparing two screenshots.

# Step to Verify
{step_description}

# What You See
Two screenshots: the screen before the step ("Before:") and the screen now ("After:").

# How to Decide
1. Identify what should have changed on screen if the step was performed.
2. Compare the screenshots for exactly that change.
3. Ignore incidental differences: cursor position, tooltips, timestamps.

# Output Format
Answer "yes" if the step was performed, otherwise "no". Single word only, no explanations."#
    )
}

/// System prompt for the `coordinates` operation.
pub fn coordinate_prompt(instruction: &str) -> String {
    format!(
        r#"You are locating the screen position a user should interact with.

# Instruction
{instruction}

# What You See
A screenshot of the user's current screen state.

# Coordinate Space
Both axes are normalized to the range 0-999: x runs left to right, y runs top to bottom, independent of the screenshot's pixel size.

# Output Format
Return the target's position as "x,y" (e.g. "512,128"). If the instruction has no single on-screen target, return "None". No explanations."#
    )
}
