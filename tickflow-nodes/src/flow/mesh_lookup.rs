//! Reading a sibling key inside a mesh.

use tickflow_core::{Key, NodeDescriptor, NodeKind, TsShape};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic, TsRef};

const KEY: &str = "key";

/// Publishes a reference to the mesh output of the key on its `key` input.
///
/// Only valid inside a graph owned by a [`MeshNode`](tickflow_engine::MeshNode).
/// Each lookup makes this graph's key depend on the looked-up key, creating
/// that key's graph if needed; a key change or stop drops the dependency.
#[derive(Debug, Default)]
pub struct MeshLookupNode {
    current: Option<Key>,
}

impl MeshLookupNode {
    /// Descriptor for a lookup of scalar mesh outputs.
    pub fn descriptor(name: &str) -> NodeDescriptor {
        NodeDescriptor::new(name, NodeKind::Compute)
            .with_input(KEY, TsShape::Scalar)
            .with_output(TsShape::reference(TsShape::Scalar))
    }

    /// Builder for a lookup named `name`.
    pub fn builder(name: &str) -> NodeBuilder {
        NodeBuilder::from_logic(Self::descriptor(name), MeshLookupNode::default)
    }
}

impl NodeLogic for MeshLookupNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let Some(value) = ctx.value(KEY)? else {
            return Ok(());
        };
        let key = value
            .to_key()
            .ok_or_else(|| anyhow::anyhow!("mesh key must be a bool, integer or string, got {}", value))?;
        if self.current.as_ref() == Some(&key) {
            return Ok(());
        }
        if let Some(previous) = self.current.take() {
            ctx.mesh_release(&previous)?;
        }
        let reference = ctx.mesh_lookup(&key)?;
        tracing::trace!(node = %ctx.node_path(), key = %key, "Mesh lookup bound");
        self.current = Some(key);
        ctx.set_reference(TsRef::Bound(reference))?;
        Ok(())
    }

    fn stop(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        if let Some(key) = self.current.take() {
            ctx.mesh_release(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConstNode;
    use tickflow_core::{EngineConfig, FlowError};
    use tickflow_engine::{BuildContext, EvaluationEngine, Wiring};

    #[test]
    fn lookup_outside_a_mesh_fails() {
        let mut w = Wiring::new();
        let key = w.add_node(ConstNode::new("a").builder());
        let lookup = w.add_node(MeshLookupNode::builder("lookup"));
        w.connect(key, lookup, KEY).unwrap();

        let mut engine =
            EvaluationEngine::new(w.build(BuildContext::ROOT).unwrap(), EngineConfig::default());
        let err = engine.run().unwrap_err();

        assert_eq!(err.code(), "E301");
        match err {
            FlowError::NodeEvaluation(error) => {
                assert_eq!(error.signature_name, "lookup");
                assert!(error.error_msg.contains("outside a keyed graph"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
