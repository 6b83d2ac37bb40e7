use crate::analysis::readiness::ReadinessReport;
use crate::analysis::unique_path::{PathNode, PathVisitor};
use crate::error::PlanError;
use crate::graph::ValueId;
use std::fmt::Write;

/// Renders the unique path of `target` one node per line, parents first.
pub fn describe_path(report: &ReadinessReport<'_>, target: ValueId) -> Result<String, PlanError> {
    let mut tracer = Tracer { output: String::new(), next: 0 };
    let name = report
        .graph()
        .contains_value(target)
        .then(|| report.graph().value_name(target).to_string())
        .ok_or(PlanError::UnknownValue(target.0))?;

    let _ = writeln!(tracer.output, "UNIQUE PATH for value '{}':", name);
    let _ = writeln!(tracer.output, "--------------------------------------------------");
    let root = report.unique_path(target, &mut tracer)?;
    let _ = writeln!(tracer.output, "=> [L{}]", root);
    Ok(tracer.output)
}

struct Tracer {
    output: String,
    next: usize,
}

impl Tracer {
    fn describe(node: &PathNode<'_>) -> String {
        match node {
            PathNode::External { token, .. } => format!("{} (external)", token),
            PathNode::Constant { name, value, .. } => format!("{} = {}", name, value),
            PathNode::Resource { name, .. } => format!("{} (resource)", name),
            PathNode::Operation { name, def, .. } => {
                let params: Vec<String> = def.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                let opaque = if def.opaque { " [OPAQUE]" } else { "" };
                format!("{} = {}({}){}", name, def.kind, params.join(", "), opaque)
            }
            PathNode::Value { name, .. } => name.to_string(),
            PathNode::Initializer { init, .. } => format!("{} (initializer)", init.name),
        }
    }
}

impl PathVisitor for Tracer {
    type Id = usize;

    fn visit(&mut self, node: PathNode<'_>, parents: &[usize]) -> usize {
        let level = self.next;
        self.next += 1;
        let _ = write!(self.output, "[L{}] {}", level, Self::describe(&node));
        if !parents.is_empty() {
            let refs: Vec<String> = parents.iter().map(|p| format!("L{}", p)).collect();
            let _ = write!(self.output, " <- {}", refs.join(", "));
        }
        self.output.push('\n');
        level
    }
}
