//! Dict entry reference.

use tickflow_core::{Key, NodeDescriptor, NodeKind, TsShape};
use tickflow_engine::{NodeBuilder, NodeContext, NodeLogic, TsRef};

const DICT: &str = "dict";
const KEY: &str = "key";

/// Publishes a reference to entry `key` of the dict on its `dict` input.
///
/// The reference is taken when the graph starts and held until it stops,
/// so consumers follow the entry as it is added, ticks and is removed
/// without the node itself ever evaluating.
#[derive(Debug, Default)]
pub struct GetItemNode {
    key: Option<Key>,
}

impl GetItemNode {
    /// Descriptor for dicts of `element`.
    pub fn descriptor(element: TsShape) -> NodeDescriptor {
        NodeDescriptor::new("get_item", NodeKind::Compute)
            .with_passive_input(DICT, TsShape::dict(element.clone()))
            .with_scalar(KEY)
            .with_output(TsShape::reference(element))
    }

    /// Builder referencing entry `key` of a dict of scalars.
    pub fn builder(key: impl Into<Key>) -> NodeBuilder {
        let key: Key = key.into();
        NodeBuilder::from_logic(Self::descriptor(TsShape::Scalar), GetItemNode::default)
            .with_scalar(KEY, key)
    }
}

impl NodeLogic for GetItemNode {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        let key = ctx
            .scalar(KEY)
            .and_then(|value| value.to_key())
            .ok_or_else(|| anyhow::anyhow!("get_item needs a keyable '{}' argument", KEY))?;
        let reference = ctx.get_ref(DICT, &key)?;
        ctx.set_reference(TsRef::Bound(reference))?;
        self.key = Some(key);
        Ok(())
    }

    fn eval(&mut self, _ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self, ctx: &mut NodeContext<'_>) -> anyhow::Result<()> {
        if let Some(key) = self.key.take() {
            ctx.release_ref(DICT, &key)?;
        }
        Ok(())
    }
}
