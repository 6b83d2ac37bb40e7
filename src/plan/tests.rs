use super::*;
use crate::cache::{Blake3Fingerprint, CacheEntry, CacheIndex, CacheKey, FixedFingerprint, PartitionKey};
use crate::config::PlannerConfig;
use crate::error::PlanError;
use crate::graph::{combine_stages, vocabulary_stages, ComputationGraph, OpDef, Params, ValueId};

const MEAN_AND_VAR_KEY: &str = "__v1__CacheableCombineAccumulate[x/mean_and_var]-HASH";

struct Scenario {
    graph: ComputationGraph,
    x: ValueId,
    outputs: Vec<ValueId>,
}

/// y = (x - mean) / var
fn mean_and_var_scenario() -> Scenario {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let stats = g
        .add_statistic("x/mean_and_var", &[x], combine_stages("MeanAndVar", Params::new(), 2))
        .unwrap();
    let y = g.apply("normalize", OpDef::new("Normalize"), &[x, stats[0], stats[1]]).unwrap();
    Scenario { graph: g, x, outputs: vec![y] }
}

fn partitions(keys: &[&str]) -> Vec<PartitionKey> {
    keys.iter().map(|k| PartitionKey::from(*k)).collect()
}

fn index_with(entries: &[(&str, &str)]) -> CacheIndex {
    let mut index = CacheIndex::new();
    for (partition, key) in entries {
        index
            .entry(PartitionKey::from(*partition))
            .or_default()
            .insert(CacheKey::from_raw(*key), CacheEntry::new(vec![0u8; 4]));
    }
    index
}

fn build_fixed(s: &Scenario, parts: &[&str], index: &CacheIndex) -> Result<BuildOutput, PlanError> {
    PlanBuilder::new(&s.graph, PlannerConfig::default())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[s.x], &s.outputs, &partitions(parts), index)
}

fn input_labels(plan: &ExecutionPlan, label: &str) -> Vec<String> {
    let id = plan.find(label).unwrap_or_else(|| panic!("missing node {}", label));
    plan.inputs(id)
        .into_iter()
        .map(|(src, _)| plan.node(src).unwrap().label.clone())
        .collect()
}

fn count_kind(plan: &ExecutionPlan, kind: &str) -> usize {
    plan.nodes().filter(|(_, n)| n.op.kind() == kind).count()
}

#[test]
fn test_cold_cache_computes_and_writes_every_partition() {
    let s = mean_and_var_scenario();
    let out = build_fixed(&s, &["span-1", "span-0"], &CacheIndex::new()).unwrap();
    let plan = &out.plan;

    assert_eq!(out.phases, 1);
    assert_eq!(
        input_labels(plan, "ApplySavedModel[Phase0][AnalysisIndex0]"),
        vec!["CreateSavedModelForAnalyzerInputs[Phase0]"]
    );
    assert_eq!(
        input_labels(plan, "CacheableCombineAccumulate[x/mean_and_var][AnalysisIndex1]"),
        vec!["TensorSource[x/mean_and_var][AnalysisIndex1]"]
    );
    assert_eq!(
        input_labels(plan, "EncodeCache[CacheableCombineAccumulate[x/mean_and_var]][AnalysisIndex0]"),
        vec!["CacheableCombineAccumulate[x/mean_and_var][AnalysisIndex0]"]
    );
    assert_eq!(
        input_labels(plan, "FlattenCache[CacheableCombineMerge[x/mean_and_var]]"),
        vec![
            "CacheableCombineAccumulate[x/mean_and_var][AnalysisIndex0]",
            "CacheableCombineAccumulate[x/mean_and_var][AnalysisIndex1]",
        ]
    );
    assert_eq!(
        input_labels(plan, "CreateTensorBinding[x/mean_and_var/Placeholder_1]"),
        vec!["CacheableCombineMerge[x/mean_and_var]"]
    );

    // Partition order follows the sorted keys.
    let source = plan.find("ApplySavedModel[Phase0][AnalysisIndex0]").unwrap();
    assert_eq!(
        plan.node(source).unwrap().op,
        PlanOp::Source { phase: 0, partition: Some(PartitionKey::from("span-0")) }
    );

    let key = CacheKey::from_raw(MEAN_AND_VAR_KEY);
    assert_eq!(out.cache_output.len(), 2);
    for partition in ["span-0", "span-1"] {
        let writes = &out.cache_output[&PartitionKey::from(partition)];
        assert_eq!(writes.len(), 1);
        let node = plan.node(writes[&key]).unwrap();
        assert!(matches!(node.op, PlanOp::CacheWrite { .. }));
    }

    let final_node = plan.node(out.final_result).unwrap();
    assert_eq!(final_node.label, "CreateSavedModel");
    assert_eq!(plan.inputs(out.final_result).len(), 2);
}

#[test]
fn test_partial_cache_reads_hit_and_computes_miss() {
    let s = mean_and_var_scenario();
    let index = index_with(&[("span-0", MEAN_AND_VAR_KEY)]);
    let out = build_fixed(&s, &["span-0", "span-1"], &index).unwrap();
    let plan = &out.plan;

    assert_eq!(
        input_labels(plan, "FlattenCache[CacheableCombineMerge[x/mean_and_var]]"),
        vec![
            "DecodeCache[CacheableCombineAccumulate[x/mean_and_var]][AnalysisIndex0]",
            "CacheableCombineAccumulate[x/mean_and_var][AnalysisIndex1]",
        ]
    );
    assert!(plan.find("ApplySavedModel[Phase0][AnalysisIndex0]").is_none());
    assert!(plan.find("ApplySavedModel[Phase0][AnalysisIndex1]").is_some());
    assert_eq!(count_kind(plan, "Accumulate"), 1);
    assert_eq!(count_kind(plan, "CacheRead"), 1);

    let written: Vec<_> = out.cache_output.keys().map(|p| p.as_str()).collect();
    assert_eq!(written, vec!["span-1"]);
}

#[test]
fn test_full_cache_skips_analysis_inputs() {
    let s = mean_and_var_scenario();
    let index = index_with(&[("span-0", MEAN_AND_VAR_KEY), ("span-1", MEAN_AND_VAR_KEY)]);
    let out = build_fixed(&s, &["span-0", "span-1"], &index).unwrap();
    let plan = &out.plan;

    assert!(out.cache_output.is_empty());
    assert_eq!(count_kind(plan, "Accumulate"), 0);
    assert_eq!(count_kind(plan, "CacheRead"), 2);
    assert!(plan.find("CreateSavedModelForAnalyzerInputs[Phase0]").is_none());
    assert_eq!(count_kind(plan, "Source"), 0);
    assert!(plan.find("CacheableCombineMerge[x/mean_and_var]").is_some());
}

#[test]
fn test_stale_version_entries_are_misses() {
    let s = mean_and_var_scenario();
    let stale = MEAN_AND_VAR_KEY.replacen("__v1__", "__v0__", 1);
    let index = index_with(&[("span-0", stale.as_str())]);
    let out = build_fixed(&s, &["span-0"], &index).unwrap();

    assert_eq!(count_kind(&out.plan, "CacheRead"), 0);
    assert_eq!(out.cache_output.len(), 1);
}

#[test]
fn test_cache_disabled_or_no_partitions_runs_flattened() {
    let s = mean_and_var_scenario();
    let index = index_with(&[("span-0", MEAN_AND_VAR_KEY)]);

    let out = PlanBuilder::new(&s.graph, PlannerConfig::default().without_cache())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[s.x], &s.outputs, &partitions(&["span-0"]), &index)
        .unwrap();
    assert!(out.cache_output.is_empty());
    assert_eq!(
        input_labels(&out.plan, "CacheableCombineAccumulate[x/mean_and_var]"),
        vec!["TensorSource[x/mean_and_var]"]
    );
    assert_eq!(
        input_labels(&out.plan, "TensorSource[x/mean_and_var]"),
        vec!["ApplySavedModel[Phase0]"]
    );

    let out = build_fixed(&s, &[], &index).unwrap();
    assert!(out.cache_output.is_empty());
    assert!(out.plan.find("FlattenCache[CacheableCombineMerge[x/mean_and_var]]").is_none());
}

#[test]
fn test_two_phases_bind_in_order() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let mean = g
        .add_statistic("x/mean", &[x], combine_stages("Mean", Params::new(), 1))
        .unwrap();
    let centered = g.apply("sub", OpDef::new("Sub"), &[x, mean[0]]).unwrap();
    let var = g
        .add_statistic("centered/mean", &[centered], combine_stages("Mean", Params::new(), 1))
        .unwrap();
    let y = g.apply("div", OpDef::new("Div"), &[centered, var[0]]).unwrap();

    let out = PlanBuilder::new(&g, PlannerConfig::default())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[x], &[y], &partitions(&["span-0"]), &CacheIndex::new())
        .unwrap();
    let plan = &out.plan;
    assert_eq!(out.phases, 2);

    // The second snapshot carries the first phase's binding.
    assert_eq!(
        input_labels(plan, "CreateSavedModelForAnalyzerInputs[Phase1]"),
        vec!["CreateTensorBinding[x/mean/Placeholder]"]
    );
    assert!(input_labels(plan, "CreateSavedModelForAnalyzerInputs[Phase0]").is_empty());

    // Results of an earlier phase are not partition pure: no cache.
    assert_eq!(
        input_labels(plan, "CacheableCombineAccumulate[centered/mean]"),
        vec!["TensorSource[centered/mean]"]
    );
    assert_eq!(
        input_labels(plan, "TensorSource[centered/mean]"),
        vec!["ApplySavedModel[Phase1]"]
    );
    let written: Vec<_> = out
        .cache_output
        .values()
        .flat_map(|m| m.keys().map(|k| k.as_str().to_string()))
        .collect();
    assert_eq!(written, vec!["__v1__CacheableCombineAccumulate[x/mean]-HASH".to_string()]);

    let order = plan.topological_order().unwrap();
    let pos = |label: &str| order.iter().position(|id| *id == plan.find(label).unwrap()).unwrap();
    assert!(pos("CreateTensorBinding[x/mean/Placeholder]") < pos("CreateSavedModelForAnalyzerInputs[Phase1]"));
    assert!(pos("CreateTensorBinding[centered/mean/Placeholder]") < pos("CreateSavedModel"));
}

#[test]
fn test_table_initialized_from_vocabulary_is_ready_next_phase() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let vocab = g.add_statistic("vocabulary", &[x], vocabulary_stages("vocab_x", None, None)).unwrap();
    let table = g.add_operation("hash_table", OpDef::new("HashTable").resource(), &[]).unwrap();
    g.add_initializer("table_init", table, &[vocab[0]]).unwrap();
    let handle = g.output(table, 0).unwrap();
    let default = g.add_constant("Const", -1i64);
    let ids = g.apply("lookup", OpDef::new("LookupTableFind"), &[handle, x, default]).unwrap();
    let ids_mean = g.add_statistic("ids/mean", &[ids], combine_stages("Mean", Params::new(), 1)).unwrap();

    let out = PlanBuilder::new(&g, PlannerConfig::default())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[x], &[ids_mean[0]], &partitions(&["span-0"]), &CacheIndex::new())
        .unwrap();
    let plan = &out.plan;
    assert_eq!(out.phases, 2);

    let phase1 = plan.find("CreateSavedModelForAnalyzerInputs[Phase1]").unwrap();
    assert_eq!(
        plan.node(phase1).unwrap().op,
        PlanOp::Snapshot { phase: Some(1), initializers: vec!["table_init".into()] }
    );
    assert_eq!(
        input_labels(plan, "VocabularyPrune[vocabulary]"),
        vec!["VocabularyMerge[vocabulary]"]
    );
    assert_eq!(
        input_labels(plan, "CreateTensorBinding[vocabulary/Placeholder]"),
        vec!["VocabularyOrderAndWrite[vocabulary]"]
    );
    // The lookup reads a table filled from a statistic result.
    assert!(plan.find("TensorSource[ids/mean]").is_some());
}

#[test]
fn test_opaque_function_disables_cache_for_that_statistic_only() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let wrapped = g.apply("tf_function", OpDef::new("PartitionedCall").opaque(), &[x]).unwrap();
    g.add_statistic("wrapped/mean", &[wrapped], combine_stages("Mean", Params::new(), 1)).unwrap();
    g.add_statistic("x/mean", &[x], combine_stages("Mean", Params::new(), 1)).unwrap();

    let out = PlanBuilder::new(&g, PlannerConfig::default())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[x], &[], &partitions(&["span-0"]), &CacheIndex::new())
        .unwrap();
    let plan = &out.plan;

    assert!(plan.find("TensorSource[wrapped/mean]").is_some());
    assert!(plan.find("TensorSource[wrapped/mean][AnalysisIndex0]").is_none());
    assert!(plan.find("TensorSource[x/mean][AnalysisIndex0]").is_some());
    let keys: Vec<_> = out.cache_output[&PartitionKey::from("span-0")].keys().cloned().collect();
    assert_eq!(keys, vec![CacheKey::from_raw("__v1__CacheableCombineAccumulate[x/mean]-HASH")]);
}

#[test]
fn test_fingerprints_are_deterministic() {
    let build = || {
        let s = mean_and_var_scenario();
        PlanBuilder::new(&s.graph, PlannerConfig::default())
            .with_fingerprint(Blake3Fingerprint)
            .build(&[s.x], &s.outputs, &partitions(&["a", "b", "c"]), &CacheIndex::new())
            .unwrap()
    };
    let (first, second) = (build(), build());
    let keys = |out: &BuildOutput| -> Vec<CacheKey> {
        out.cache_output.values().flat_map(|m| m.keys().cloned()).collect()
    };
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first.plan.to_json().unwrap(), second.plan.to_json().unwrap());

    // A warm run over the same partitions reads everything back.
    let index: CacheIndex = first
        .cache_output
        .iter()
        .map(|(p, m)| (p.clone(), m.keys().map(|k| (k.clone(), CacheEntry::new(vec![1u8]))).collect()))
        .collect();
    let s = mean_and_var_scenario();
    let warm = PlanBuilder::new(&s.graph, PlannerConfig::default())
        .build(&[s.x], &s.outputs, &partitions(&["a", "b", "c"]), &index)
        .unwrap();
    assert!(warm.cache_output.is_empty());
    assert_eq!(count_kind(&warm.plan, "CacheRead"), 3);
}

#[test]
fn test_fingerprints_do_not_depend_on_partition_count() {
    let keys_of_a = |parts: &[&str]| -> Vec<CacheKey> {
        let s = mean_and_var_scenario();
        let out = PlanBuilder::new(&s.graph, PlannerConfig::default())
            .with_fingerprint(Blake3Fingerprint)
            .build(&[s.x], &s.outputs, &partitions(parts), &CacheIndex::new())
            .unwrap();
        out.cache_output[&PartitionKey::from("a")].keys().cloned().collect()
    };
    let alone = keys_of_a(&["a"]);
    assert_eq!(alone.len(), 1);
    assert_eq!(alone, keys_of_a(&["a", "b", "c"]));
    assert_eq!(alone, keys_of_a(&["c", "a"]));
}

#[test]
fn test_no_statistics_needs_no_data() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let one = g.add_constant("Const", 1i64);
    let y = g.apply("add", OpDef::new("Add"), &[x, one]).unwrap();
    let index = index_with(&[("span-0", MEAN_AND_VAR_KEY), ("span-1", MEAN_AND_VAR_KEY)]);

    let out = PlanBuilder::new(&g, PlannerConfig::default())
        .with_fingerprint(FixedFingerprint("HASH".into()))
        .build(&[x], &[y], &partitions(&["span-0", "span-1"]), &index)
        .unwrap();
    assert_eq!(out.phases, 0);
    assert!(out.cache_output.is_empty());
    assert_eq!(count_kind(&out.plan, "CacheRead"), 0);
    assert_eq!(count_kind(&out.plan, "Source"), 0);
    assert_eq!(out.plan.node_count(), 1);
    assert_eq!(out.plan.node(out.final_result).unwrap().label, "CreateSavedModel");
}

#[test]
fn test_statistic_feeding_its_own_table_is_unsatisfiable() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let table = g.add_operation("hash_table", OpDef::new("HashTable").resource(), &[]).unwrap();
    let handle = g.output(table, 0).unwrap();
    let default = g.add_constant("Const", -1i64);
    let ids = g.apply("lookup", OpDef::new("LookupTableFind"), &[handle, x, default]).unwrap();
    let vocab = g.add_statistic("ids/vocab", &[ids], vocabulary_stages("vocab_ids", None, None)).unwrap();
    g.add_initializer("table_init", table, &[vocab[0]]).unwrap();
    g.add_statistic("x/mean", &[x], combine_stages("Mean", Params::new(), 1)).unwrap();

    let err = PlanBuilder::new(&g, PlannerConfig::default())
        .build(&[x], &[ids], &partitions(&["span-0"]), &CacheIndex::new())
        .unwrap_err();
    assert_eq!(err, PlanError::Unsatisfiable { pending: vec!["ids/vocab".to_string()] });
}

#[test]
fn test_requested_output_without_statistics_is_checked() {
    let mut g = ComputationGraph::new();
    let x = g.add_placeholder("x");
    let stray = g.add_placeholder("stray");
    let y = g.apply("add", OpDef::new("Add"), &[x, stray]).unwrap();

    let err = PlanBuilder::new(&g, PlannerConfig::default())
        .build(&[x], &[y], &[], &CacheIndex::new())
        .unwrap_err();
    assert_eq!(
        err,
        PlanError::ManuallyInjectedValue { value: "add:0".into(), placeholder: "stray".into() }
    );
}

#[test]
fn test_undeclared_input_is_reported() {
    let s = mean_and_var_scenario();
    let err = PlanBuilder::new(&s.graph, PlannerConfig::default())
        .build(&[], &s.outputs, &partitions(&["span-0"]), &CacheIndex::new())
        .unwrap_err();
    assert!(err.to_string().contains("manually adding a placeholder"), "Msg: {}", err);
}

#[test]
fn test_unknown_ids_are_rejected() {
    let s = mean_and_var_scenario();
    let err = PlanBuilder::new(&s.graph, PlannerConfig::default())
        .build(&[s.x], &[ValueId(99)], &[], &CacheIndex::new())
        .unwrap_err();
    assert_eq!(err, PlanError::UnknownValue(99));
}

#[test]
fn test_partitionable_flags_on_built_plan() {
    let s = mean_and_var_scenario();
    let out = build_fixed(&s, &["span-0"], &CacheIndex::new()).unwrap();
    for (_, node) in out.plan.nodes() {
        match node.op {
            PlanOp::Merge { .. } | PlanOp::Finalize { .. } | PlanOp::BindResult { .. } | PlanOp::Snapshot { .. } => {
                assert!(!node.partitionable, "{}", node.label)
            }
            _ => assert!(node.partitionable, "{}", node.label),
        }
    }
}
