//! Split buffer type and split buffer
//!
//! The buffer type is the allocator-like object registered with the tensor
//! library at model load. For each tensor placed into a buffer it decides
//! the layout: expert tensors get one remote sub-buffer per endpoint, sized
//! to that endpoint's expert share; everything else lands whole on
//! endpoint 0. Uploads slice the source bytes along the expert axis at the
//! exact byte boundaries the plan implies.
//!
//! A buffer poisons itself on the first transport error and fails fast on
//! every later operation; a broken endpoint connection is never rebuilt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use moesplit_client::{ClientError, Endpoint, EndpointClient};

use crate::classify::is_expert_tensor;
use crate::config::parse_config;
use crate::error::{EngineError, Result};
use crate::plan::{normalize_weights, plan_expert, SplitPlan};
use crate::tensor::TensorDesc;

/// How a buffer type places tensors across endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Expert tensors are split per the weight proportions
    SplitByExpert,
    /// Every tensor lands whole on endpoint 0
    SingleEndpoint,
}

struct BufferTypeInner {
    clients: Vec<Arc<EndpointClient>>,
    weights: Vec<f32>,
    placement: Placement,
}

/// Value-typed descriptor of a split allocation scheme: the endpoints,
/// their normalized memory weights and the placement tag. Immutable once
/// constructed; clones share the underlying connections.
#[derive(Clone)]
pub struct SplitBufferType {
    inner: Arc<BufferTypeInner>,
}

impl SplitBufferType {
    /// Connect to every endpoint and build a split buffer type.
    ///
    /// Weights are normalized here (all-zero becomes uniform). Connection
    /// failures abort construction with an error naming the endpoint.
    pub fn connect(endpoints: Vec<Endpoint>, weights: &[f32]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(EngineError::Config("empty endpoint list".to_string()));
        }
        if endpoints.len() != weights.len() {
            return Err(EngineError::Config(format!(
                "{} endpoints but {} weights",
                endpoints.len(),
                weights.len()
            )));
        }
        let weights = normalize_weights(weights)?;

        let mut clients = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let client = EndpointClient::connect(endpoint)?;
            info!(endpoint = %client.endpoint(), "split endpoint connected");
            clients.push(Arc::new(client));
        }

        Ok(Self {
            inner: Arc::new(BufferTypeInner {
                clients,
                weights,
                placement: Placement::SplitByExpert,
            }),
        })
    }

    /// Parse an `endpoints|weights` config string and connect
    pub fn from_config(config: &str) -> Result<Self> {
        let (endpoints, weights) = parse_config(config)?;
        Self::connect(endpoints, &weights)
    }

    /// A plain single-endpoint buffer type; nothing is ever split
    pub fn single(endpoint: Endpoint) -> Result<Self> {
        let client = EndpointClient::connect(endpoint)?;
        Ok(Self {
            inner: Arc::new(BufferTypeInner {
                clients: vec![Arc::new(client)],
                weights: vec![1.0],
                placement: Placement::SingleEndpoint,
            }),
        })
    }

    pub fn placement(&self) -> Placement {
        self.inner.placement
    }

    pub fn n_endpoints(&self) -> usize {
        self.inner.clients.len()
    }

    /// The endpoints, in split order
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner
            .clients
            .iter()
            .map(|c| c.endpoint().clone())
            .collect()
    }

    /// Normalized memory weights, summing to 1
    pub fn weights(&self) -> &[f32] {
        &self.inner.weights
    }

    /// The split plan this type would use for `desc`, None when the tensor
    /// is not split
    pub fn plan_for_desc(&self, desc: &TensorDesc) -> Result<Option<SplitPlan>> {
        if self.inner.placement == Placement::SplitByExpert && is_expert_tensor(&desc.name) {
            Ok(Some(plan_expert(desc.n_expert(), &self.inner.weights)?))
        } else {
            Ok(None)
        }
    }

    /// Allocate a logical buffer backed by this type
    pub fn alloc_buffer(&self) -> SplitBuffer {
        SplitBuffer {
            buft: self.clone(),
            tensors: Mutex::new(HashMap::new()),
            poisoned: Mutex::new(None),
        }
    }

    pub(crate) fn client(&self, endpoint: usize) -> &Arc<EndpointClient> {
        &self.inner.clients[endpoint]
    }
}

impl std::fmt::Debug for SplitBufferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitBufferType")
            .field("placement", &self.inner.placement)
            .field("n_endpoints", &self.n_endpoints())
            .field("weights", &self.inner.weights)
            .finish()
    }
}

/// Whether a buffer type shards expert tensors across endpoints
pub fn is_rpc_split(buft: &SplitBufferType) -> bool {
    buft.placement() == Placement::SplitByExpert
}

/// One remote sub-buffer
#[derive(Debug, Clone, Copy)]
pub(crate) struct RemoteShard {
    pub handle: u64,
    pub size: u64,
}

/// Per-tensor bookkeeping: the descriptor, the plan (None for unsplit
/// tensors) and one optional shard per endpoint
#[derive(Debug, Clone)]
pub(crate) struct TensorEntry {
    pub desc: TensorDesc,
    pub plan: Option<SplitPlan>,
    pub shards: Vec<Option<RemoteShard>>,
}

/// A logical buffer whose tensors physically live as disjoint remote
/// sub-buffers on the split endpoints
pub struct SplitBuffer {
    buft: SplitBufferType,
    tensors: Mutex<HashMap<String, TensorEntry>>,
    poisoned: Mutex<Option<String>>,
}

impl SplitBuffer {
    pub fn buffer_type(&self) -> &SplitBufferType {
        &self.buft
    }

    /// Allocate remote sub-buffers for `desc`.
    ///
    /// Expert tensors get one sub-buffer per endpoint with a nonzero share,
    /// sized `width * bytes_per_expert`; other tensors get one full-size
    /// sub-buffer on endpoint 0.
    pub fn alloc_tensor(&self, desc: &TensorDesc) -> Result<()> {
        self.check_poisoned()?;
        {
            let tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
            if tensors.contains_key(&desc.name) {
                return Err(EngineError::Config(format!(
                    "tensor '{}' already allocated",
                    desc.name
                )));
            }
        }

        let plan = self.buft.plan_for_desc(desc)?;
        let mut shards: Vec<Option<RemoteShard>> = vec![None; self.buft.n_endpoints()];

        match &plan {
            Some(plan) => {
                let bytes_per_expert = desc.bytes_per_expert() as u64;
                for (i, range) in plan.ranges().iter().enumerate() {
                    if range.is_empty() {
                        continue;
                    }
                    let size = range.width() as u64 * bytes_per_expert;
                    let handle = self
                        .buft
                        .client(i)
                        .alloc(size)
                        .map_err(|e| self.fail(e))?;
                    debug!(
                        tensor = %desc.name,
                        endpoint = i,
                        experts = range.width(),
                        size,
                        "allocated expert shard"
                    );
                    shards[i] = Some(RemoteShard { handle, size });
                }
                info!(tensor = %desc.name, n_expert = desc.n_expert(), "expert tensor split");
            }
            None => {
                let size = desc.nbytes() as u64;
                let handle = self
                    .buft
                    .client(0)
                    .alloc(size)
                    .map_err(|e| self.fail(e))?;
                shards[0] = Some(RemoteShard { handle, size });
            }
        }

        let entry = TensorEntry {
            desc: desc.clone(),
            plan,
            shards,
        };
        let mut tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
        tensors.insert(desc.name.clone(), entry);
        Ok(())
    }

    /// Upload the full tensor data, slicing along the expert axis.
    ///
    /// The expert axis is outermost and contiguous, so endpoint `i`'s shard
    /// is the byte range `[lo_i, hi_i) * bytes_per_expert` and is written
    /// at offset 0 of its sub-buffer.
    pub fn upload_tensor(&self, name: &str, data: &[u8]) -> Result<()> {
        self.check_poisoned()?;
        let entry = self.entry_snapshot(name)?;

        if data.len() != entry.desc.nbytes() {
            return Err(EngineError::ShapeMismatch(format!(
                "tensor '{name}' expects {} bytes, got {}",
                entry.desc.nbytes(),
                data.len()
            )));
        }

        match &entry.plan {
            Some(plan) => {
                let bytes_per_expert = entry.desc.bytes_per_expert();
                for (i, range) in plan.ranges().iter().enumerate() {
                    let Some(shard) = entry.shards[i] else {
                        continue;
                    };
                    let start = range.lo as usize * bytes_per_expert;
                    let end = range.hi as usize * bytes_per_expert;
                    self.buft
                        .client(i)
                        .upload(shard.handle, 0, &data[start..end])
                        .map_err(|e| self.fail(e))?;
                    debug!(tensor = %name, endpoint = i, bytes = end - start, "shard uploaded");
                }
            }
            None => {
                let shard = entry.shards[0].ok_or_else(|| {
                    EngineError::UnknownTensor(name.to_string())
                })?;
                self.buft
                    .client(0)
                    .upload(shard.handle, 0, data)
                    .map_err(|e| self.fail(e))?;
            }
        }
        Ok(())
    }

    /// Read every shard back and reassemble the full tensor bytes in
    /// endpoint order. The gather fallback path builds on this.
    pub fn gather_tensor(&self, name: &str) -> Result<Vec<u8>> {
        self.check_poisoned()?;
        let entry = self.entry_snapshot(name)?;

        let mut data = Vec::with_capacity(entry.desc.nbytes());
        for (i, shard) in entry.shards.iter().enumerate() {
            let Some(shard) = shard else { continue };
            let bytes = self
                .buft
                .client(i)
                .download(shard.handle, 0, shard.size)
                .map_err(|e| self.fail(e))?;
            if bytes.len() as u64 != shard.size {
                return Err(EngineError::ShapeMismatch(format!(
                    "shard {i} of '{name}' returned {} bytes, expected {}",
                    bytes.len(),
                    shard.size
                )));
            }
            data.extend_from_slice(&bytes);
        }
        Ok(data)
    }

    /// Free the remote sub-buffers of one tensor
    pub fn free_tensor(&self, name: &str) -> Result<()> {
        self.check_poisoned()?;
        let entry = {
            let mut tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
            tensors
                .remove(name)
                .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))?
        };
        self.free_entry(&entry)
    }

    /// Free every tensor in this buffer. Frees are attempted for all
    /// shards even after a failure; the first error is returned.
    pub fn free_all(&self) -> Result<()> {
        let entries: Vec<TensorEntry> = {
            let mut tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
            tensors.drain().map(|(_, e)| e).collect()
        };

        let mut first_error = None;
        for entry in &entries {
            if let Err(e) = self.free_entry(entry) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The split plan of a tensor, None for unsplit tensors
    pub fn plan_for(&self, name: &str) -> Option<SplitPlan> {
        let tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
        tensors.get(name).and_then(|e| e.plan.clone())
    }

    pub fn n_tensors(&self) -> usize {
        let tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
        tensors.len()
    }

    fn free_entry(&self, entry: &TensorEntry) -> Result<()> {
        for (i, shard) in entry.shards.iter().enumerate() {
            let Some(shard) = shard else { continue };
            self.buft
                .client(i)
                .free(shard.handle)
                .map_err(|e| self.fail(e))?;
        }
        Ok(())
    }

    pub(crate) fn entry_snapshot(&self, name: &str) -> Result<TensorEntry> {
        let tensors = self.tensors.lock().unwrap_or_else(|p| p.into_inner());
        tensors
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTensor(name.to_string()))
    }

    pub(crate) fn check_poisoned(&self) -> Result<()> {
        let poisoned = self.poisoned.lock().unwrap_or_else(|p| p.into_inner());
        match &*poisoned {
            Some(endpoint) => Err(EngineError::Poisoned {
                endpoint: endpoint.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Convert a client error, poisoning the buffer on transport failures
    pub(crate) fn fail(&self, err: ClientError) -> EngineError {
        if err.is_transport() {
            let mut poisoned = self.poisoned.lock().unwrap_or_else(|p| p.into_inner());
            poisoned.get_or_insert_with(|| err.endpoint().to_string());
        }
        EngineError::Client(err)
    }
}

impl Drop for SplitBuffer {
    fn drop(&mut self) {
        if self.check_poisoned().is_err() {
            return;
        }
        if let Err(e) = self.free_all() {
            debug!("split buffer teardown left remote shards behind: {e}");
        }
    }
}

impl std::fmt::Debug for SplitBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitBuffer")
            .field("buft", &self.buft)
            .field("n_tensors", &self.n_tensors())
            .finish()
    }
}
