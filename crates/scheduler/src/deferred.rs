use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use blockflow_core::{Arg, Args, Value};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::output::{BlockOutput, IntoBlockOutput};
use crate::progress::{Progress, ProgressBoard};

/// Type-erased block function, shared across worker threads.
pub type BlockFn = Arc<dyn Fn(&mut BlockContext) -> anyhow::Result<BlockOutput> + Send + Sync>;

/// Adapt a user function to [`BlockFn`] at registration time.
pub(crate) fn erase<F, O>(f: F) -> BlockFn
where
    F: Fn(&mut BlockContext) -> anyhow::Result<O> + Send + Sync + 'static,
    O: IntoBlockOutput,
{
    Arc::new(move |ctx: &mut BlockContext| f(ctx).map(IntoBlockOutput::into_block_output))
}

/// Where each block call gets its random generator from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedSource {
    /// Fresh OS entropy for every call.
    #[default]
    Entropy,
    /// Reproducible: the seed is mixed with a stable hash of the block name,
    /// so sibling blocks still get distinct streams.
    Fixed(u64),
}

impl SeedSource {
    pub fn rng_for(&self, block: &str) -> ChaCha8Rng {
        match self {
            SeedSource::Entropy => ChaCha8Rng::from_entropy(),
            SeedSource::Fixed(seed) => ChaCha8Rng::seed_from_u64(seed ^ fnv1a(block)),
        }
    }
}

/// 64-bit FNV-1a. Stable across runs and platforms, unlike `DefaultHasher`.
fn fnv1a(s: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    s.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// A block function with its keyword arguments bound.
#[derive(Clone)]
pub struct DeferredFunction {
    func: BlockFn,
    args: Args,
}

impl DeferredFunction {
    pub fn new(func: BlockFn, args: Args) -> Self {
        Self { func, args }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Call the function with a fresh context.
    pub fn call(
        &self,
        name: &str,
        seed: &SeedSource,
        board: Arc<ProgressBoard>,
    ) -> anyhow::Result<BlockOutput> {
        let mut ctx = BlockContext::new(name, self.args.clone(), seed.rng_for(name), board);
        (self.func)(&mut ctx)
    }
}

impl std::fmt::Debug for DeferredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredFunction")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Everything a block function can see while it runs.
pub struct BlockContext {
    name: String,
    args: Args,
    rng: ChaCha8Rng,
    board: Arc<ProgressBoard>,
}

impl BlockContext {
    pub fn new(name: &str, args: Args, rng: ChaCha8Rng, board: Arc<ProgressBoard>) -> Self {
        Self {
            name: name.to_string(),
            args,
            rng,
            board,
        }
    }

    /// Block name, e.g. `sweep-a-0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn arg(&self, name: &str) -> anyhow::Result<&Arg> {
        self.args
            .get(name)
            .ok_or_else(|| anyhow!("block '{}' has no argument '{name}'", self.name))
    }

    pub fn value(&self, name: &str) -> anyhow::Result<&Value> {
        self.arg(name)?
            .as_value()
            .ok_or_else(|| anyhow!("argument '{name}' of block '{}' is opaque", self.name))
    }

    pub fn f64(&self, name: &str) -> anyhow::Result<f64> {
        self.value(name)?
            .as_f64()
            .with_context(|| format!("argument '{name}' is not numeric"))
    }

    pub fn i64(&self, name: &str) -> anyhow::Result<i64> {
        self.value(name)?
            .as_i64()
            .with_context(|| format!("argument '{name}' is not an integer"))
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        self.value(name)?
            .as_str()
            .with_context(|| format!("argument '{name}' is not text"))
    }

    pub fn opaque<T: Any>(&self, name: &str) -> anyhow::Result<&T> {
        self.arg(name)?.downcast_ref::<T>().with_context(|| {
            format!(
                "argument '{name}' is not an opaque {}",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// An independent generator derived from this block's one, for use
    /// inside a returned stream.
    pub fn fork_rng(&mut self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.rng.next_u64())
    }

    /// Wrap `iter` so the run's progress board shows its advance.
    pub fn progress<I>(&self, iter: I) -> Progress<I::IntoIter>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
    {
        Progress::new(iter.into_iter(), self.name.clone(), Arc::clone(&self.board))
    }
}
