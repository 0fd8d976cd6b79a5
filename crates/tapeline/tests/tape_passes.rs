use std::sync::{Arc, Mutex};

use anyhow::Result;

use tapeline::graph::Graph;
use tapeline::ops::{FusedMlpArgs, OpKind};
use tapeline::tape::{
    DeadCodeEliminationPass, MlpFusionPass, PassRegistry, PassReport, Tape, TapePass,
};
use tapeline::{from_buffer, Context, Tensor};

fn square(value: f32) -> Tensor {
    from_buffer([2, 2], vec![value; 4]).unwrap()
}

fn bias_row(value: f32) -> Tensor {
    from_buffer([1, 2], vec![value; 2]).unwrap()
}

#[test]
fn dce_drops_entries_unreachable_from_the_roots() -> Result<()> {
    let ctx = Context::new();
    ctx.set_optimization_enabled(false);

    let x = square(1.0);
    let kept = ctx.relu(&x)?;
    let kept_tail = ctx.relu(&kept)?;
    let dead = ctx.add(&x, &x)?;
    let dead_tail = ctx.multiply(&dead, &x)?;

    // Lower everything, then require only one root.
    let mut tape = ctx.compile(&[kept_tail.clone(), dead_tail])?;
    assert_eq!(tape.len(), 4);

    let report = DeadCodeEliminationPass.apply(&mut tape, ctx.graph(), &[kept_tail.clone()])?;
    assert!(report.changed);
    assert_eq!(report.removed, 2);
    assert_eq!(tape.len(), 2);
    tape.validate()?;
    assert!(tape.entry(kept_tail.producer().unwrap()).is_some());
    Ok(())
}

#[test]
fn dce_is_the_identity_on_fully_live_tapes() -> Result<()> {
    let ctx = Context::new();
    ctx.set_optimization_enabled(false);

    let x = square(1.0);
    let a = ctx.relu(&x)?;
    let b = ctx.relu(&a)?;

    let mut tape = ctx.compile(&[b.clone()])?;
    let report = DeadCodeEliminationPass.apply(&mut tape, ctx.graph(), &[b])?;
    assert_eq!(report, PassReport::default());
    assert_eq!(tape.len(), 2);
    Ok(())
}

#[test]
fn matmul_add_pairs_fuse_into_one_entry() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let bias = bias_row(1.0);
    let m = ctx.matmul(&x, &w, false, false)?;
    let out = ctx.add(&m, &bias)?;

    let tape = ctx.compile(&[out.clone()])?;
    assert_eq!(tape.len(), 1);

    let entry = &tape.entries()[0];
    assert_eq!(entry.kind(), OpKind::FusedMlp);
    let payload = entry.args.try_cast::<FusedMlpArgs>()?;
    assert!(!payload.has_relu);
    // The retired Add id stays addressable through the fused entry.
    assert!(entry.outputs.contains(&out.producer().unwrap()));
    assert_eq!(entry.constants.len(), 3);
    tape.validate()?;

    // The synthesized node landed in the store.
    assert_eq!(ctx.graph().nodes_of_kind(OpKind::FusedMlp).len(), 1);

    // And the rewritten tape computes the same values: 2x2 matmul of 2s and
    // 3s is 12 everywhere, plus the bias of 1s.
    let result = ctx.evaluate(&out)?;
    assert_eq!(result.data(), &[13.0; 4]);
    Ok(())
}

#[test]
fn fusion_is_suppressed_when_the_matmul_has_other_consumers() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let bias = bias_row(1.0);
    let m = ctx.matmul(&x, &w, false, false)?;
    let out = ctx.add(&m, &bias)?;
    let sibling = ctx.relu(&m)?;

    let tape = ctx.compile(&[out, sibling])?;
    assert_eq!(tape.len(), 3);
    assert!(tape
        .entries()
        .iter()
        .all(|entry| entry.kind() != OpKind::FusedMlp));
    Ok(())
}

#[test]
fn fusion_is_suppressed_when_the_add_fans_out() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let bias = bias_row(1.0);
    let m = ctx.matmul(&x, &w, false, false)?;
    let out = ctx.add(&m, &bias)?;
    let left = ctx.relu(&out)?;
    let right = ctx.multiply(&out, &bias)?;

    let tape = ctx.compile(&[left, right])?;
    assert_eq!(tape.len(), 4);
    assert!(tape
        .entries()
        .iter()
        .all(|entry| entry.kind() != OpKind::FusedMlp));
    Ok(())
}

#[test]
fn fusion_is_suppressed_when_the_add_operand_is_not_a_bias_row() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let full = square(1.0);
    let m = ctx.matmul(&x, &w, false, false)?;
    let out = ctx.add(&m, &full)?;

    // A full [2, 2] addend is not the row-bias dataflow the fused kernel
    // computes, so the pair stays unfused and evaluates as written.
    let tape = ctx.compile(&[out.clone()])?;
    assert_eq!(tape.len(), 2);
    assert!(tape
        .entries()
        .iter()
        .all(|entry| entry.kind() != OpKind::FusedMlp));

    let result = ctx.evaluate(&out)?;
    assert_eq!(result.data(), &[13.0; 4]);
    Ok(())
}

#[test]
fn fusion_is_suppressed_when_the_matmul_is_transposed() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let bias = bias_row(1.0);
    let m = ctx.matmul(&x, &w, true, false)?;
    let out = ctx.add(&m, &bias)?;

    let tape = ctx.compile(&[out.clone()])?;
    assert_eq!(tape.len(), 2);
    assert!(tape
        .entries()
        .iter()
        .all(|entry| entry.kind() != OpKind::FusedMlp));

    // All-2s by all-3s is transpose-invariant, so the unfused value is
    // still 12 plus the bias.
    let result = ctx.evaluate(&out)?;
    assert_eq!(result.data(), &[13.0; 4]);
    Ok(())
}

#[test]
fn downstream_consumers_follow_the_fused_id() -> Result<()> {
    let ctx = Context::new();
    let x = square(2.0);
    let w = square(3.0);
    let bias = bias_row(1.0);
    let m = ctx.matmul(&x, &w, false, false)?;
    let out = ctx.add(&m, &bias)?;
    let gated = ctx.relu(&out)?;

    let tape = ctx.compile(&[gated.clone()])?;
    assert_eq!(tape.len(), 2);
    tape.validate()?;

    let fused_entry = tape
        .entries()
        .iter()
        .find(|entry| entry.kind() == OpKind::FusedMlp)
        .expect("pair must fuse");
    let relu_entry = tape.entry(gated.producer().unwrap()).unwrap();
    let relu_inputs: Vec<_> = relu_entry.input_ids().collect();
    assert_eq!(relu_inputs, vec![fused_entry.node_id]);

    let result = ctx.evaluate(&gated)?;
    assert_eq!(result.data(), &[13.0; 4]);
    Ok(())
}

#[test]
fn fusion_without_a_pattern_is_the_identity() -> Result<()> {
    let ctx = Context::new();
    ctx.set_optimization_enabled(false);

    let x = square(1.0);
    let a = ctx.relu(&x)?;
    let b = ctx.add(&a, &x)?;
    let mut tape = ctx.compile(&[b.clone()])?;

    let report = MlpFusionPass.apply(&mut tape, ctx.graph(), &[b])?;
    assert_eq!(report, PassReport::default());
    assert_eq!(tape.len(), 2);
    Ok(())
}

struct RecordingPass {
    name: &'static str,
    priority: u32,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl TapePass for RecordingPass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn apply(&self, _tape: &mut Tape, _graph: &Graph, _roots: &[Tensor]) -> tapeline::Result<PassReport> {
        self.log.lock().unwrap().push(self.name);
        Ok(PassReport::default())
    }
}

#[test]
fn passes_run_in_priority_then_name_order() -> Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PassRegistry::empty();
    for (name, priority) in [("zeta", 10u32), ("late", 90), ("alpha", 10), ("mid", 40)] {
        registry.register(Arc::new(RecordingPass {
            name,
            priority,
            log: Arc::clone(&log),
        }));
    }

    let graph = Graph::new();
    let mut tape = Tape::new();
    registry.run(&mut tape, &graph, &[])?;

    assert_eq!(log.lock().unwrap().as_slice(), &["alpha", "zeta", "mid", "late"]);
    Ok(())
}
