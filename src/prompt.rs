/// Prompt text for the planning call and each iteration.
use crate::assistant::Capabilities;
use crate::compute::ComputeOutcome;
use crate::resources::ResourceInfo;

/// One-shot prompt asking the assistant to turn IDEA.md into PLAN.md.
pub fn plan_prompt(resources: &ResourceInfo, capabilities: Capabilities) -> String {
    let mut prompt = format!(
        "Read IDEA.md and create a detailed PLAN.md that includes:
1. Clear objectives and success metrics
2. Simple initial implementation approach
3. Key hyperparameters to start with
4. Expected challenges and solutions

Focus on getting a minimal working version first.

System Information:
- {resources}"
    );
    for hint in capabilities.install_hints() {
        prompt.push_str("\n- ");
        prompt.push_str(hint);
    }
    prompt
}

/// Prompt for `iteration`, reporting how the computation run just went.
///
/// The first iteration points at the plan and the log files explicitly;
/// later ones summarise the previous run's result.
pub fn iteration_prompt(
    iteration: u32,
    previous: &ComputeOutcome,
    resources: &ResourceInfo,
    capabilities: Capabilities,
) -> String {
    let mut prompt = if iteration <= 1 {
        format!(
            "This is iteration {iteration} of the ML experiment.

First examine these files:
- PLAN.md (the experiment plan)
- logs/iter_{iteration}_stderr.txt (check for errors)
- logs/iter_{iteration}_stdout.txt (training output)

Based on the results:
1. If there are errors, fix them in the training script
2. If training worked, analyze performance and suggest improvements
3. Make small, focused changes to improve results

Create or update the training script as needed.

System Information:
- {resources}"
        )
    } else {
        let result = if previous.success {
            "succeeded".to_string()
        } else {
            format!("failed: {}", previous.message)
        };
        format!(
            "This is iteration {iteration}. The previous training {result}.

Examine the latest logs and results, then:
1. Fix any errors if present
2. Improve hyperparameters or architecture if needed
3. If the experiment has achieved its goals, create REPORT.md
"
        )
    };

    for hint in capabilities.install_hints() {
        prompt.push_str("\n\nNote: ");
        prompt.push_str(hint);
    }
    prompt
}
