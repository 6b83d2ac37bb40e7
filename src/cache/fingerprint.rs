//! Fingerprints of statistic subgraphs.
//!
//! The unique path of every statistic input is serialized line by line into
//! a material buffer, `(index, kind, canonical params, parent indices)`,
//! salted with the cache format version. The stage chain up to a cacheable
//! stage is appended before hashing, so each cacheable stage gets its own
//! key.

use super::key::CacheKey;
use crate::analysis::readiness::ReadinessReport;
use crate::analysis::unique_path::{PathNode, PathVisitor};
use crate::error::PlanError;
use crate::graph::types::write_canonical_params;
use crate::graph::{StageDef, ValueId};
use std::collections::BTreeSet;
use std::fmt::{self, Write};

/// Turns fingerprint material into a stable digest.
pub trait FingerprintStrategy: fmt::Debug {
    fn digest(&self, material: &[u8]) -> String;
}

/// BLAKE3, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Fingerprint;

impl FingerprintStrategy for Blake3Fingerprint {
    fn digest(&self, material: &[u8]) -> String {
        blake3::hash(material).to_hex().to_string()
    }
}

/// Returns the same digest for everything. Makes cache keys predictable.
#[derive(Debug, Clone)]
pub struct FixedFingerprint(pub String);

impl FingerprintStrategy for FixedFingerprint {
    fn digest(&self, _material: &[u8]) -> String { self.0.clone() }
}

/// Accumulates fingerprint material for one statistic.
#[derive(Debug)]
pub struct Fingerprinter<'a> {
    material: String,
    next_index: usize,
    statistic_outputs: &'a BTreeSet<ValueId>,
    opaque_ops: Vec<String>,
    bound_inputs: Vec<String>,
}

impl<'a> Fingerprinter<'a> {
    /// `statistic_outputs` are the result placeholders of every statistic;
    /// reaching one makes the fingerprint phase dependent.
    pub fn new(version: &str, statistic_outputs: &'a BTreeSet<ValueId>) -> Self {
        Self {
            material: format!("version={}\n", version),
            next_index: 0,
            statistic_outputs,
            opaque_ops: Vec::new(),
            bound_inputs: Vec::new(),
        }
    }

    /// Appends the unique path of the statistic's `position`-th input.
    pub fn add_input(&mut self, report: &ReadinessReport<'_>, position: usize, value: ValueId) -> Result<(), PlanError> {
        let root = report.unique_path(value, &mut *self)?;
        let _ = writeln!(self.material, "input {} -> {}", position, root);
        Ok(())
    }

    /// Names of opaque operations on the path. Non-empty means the
    /// fingerprint cannot describe the computation.
    pub fn opaque_ops(&self) -> &[String] { &self.opaque_ops }

    /// Results of earlier statistics on the path.
    pub fn bound_inputs(&self) -> &[String] { &self.bound_inputs }

    pub fn is_cacheable(&self) -> bool {
        self.opaque_ops.is_empty() && self.bound_inputs.is_empty()
    }

    pub fn material(&self) -> &str { &self.material }

    /// Key of `stages[upto]`, covering the inputs and `stages[..=upto]`.
    pub fn stage_key(
        &self,
        version: &str,
        statistic: &str,
        stages: &[StageDef],
        upto: usize,
        strategy: &dyn FingerprintStrategy,
    ) -> CacheKey {
        let mut material = self.material.clone();
        for stage in &stages[..=upto] {
            let _ = write!(material, "stage|{}|{:?}|", stage.name, stage.role);
            write_canonical_params(&stage.params, &mut material);
            let _ = writeln!(
                material,
                "|{}|{}",
                stage.num_outputs,
                stage.cache_coder.as_deref().unwrap_or("-")
            );
        }
        let hash = strategy.digest(material.as_bytes());
        CacheKey::new(version, &stages[upto].label(statistic), &hash)
    }
}

impl PathVisitor for Fingerprinter<'_> {
    type Id = usize;

    fn visit(&mut self, node: PathNode<'_>, parents: &[usize]) -> usize {
        let idx = self.next_index;
        self.next_index += 1;

        let out = &mut self.material;
        let _ = write!(out, "{}|", idx);
        match node {
            PathNode::External { id, token } => {
                if self.statistic_outputs.contains(&id) {
                    self.bound_inputs.push(token.clone());
                }
                let _ = write!(out, "ext|{:?}", token);
            }
            PathNode::Constant { value, .. } => {
                out.push_str("const|");
                value.write_canonical(out);
            }
            PathNode::Resource { name, .. } => {
                let _ = write!(out, "resource|{:?}", name);
            }
            PathNode::Operation { name, def, .. } => {
                if def.opaque {
                    self.opaque_ops.push(name.to_string());
                }
                let _ = write!(out, "op|{:?}|", def.kind);
                write_canonical_params(&def.params, out);
            }
            PathNode::Value { slot, .. } => {
                let _ = write!(out, "out|{}", slot);
            }
            PathNode::Initializer { init, .. } => {
                let _ = write!(out, "init|{:?}", init.name);
            }
        }
        out.push('|');
        for (i, p) in parents.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}", p);
        }
        out.push('\n');
        idx
    }
}
