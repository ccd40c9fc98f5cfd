//! In-process runtime for tests and single-node runs.
//!
//! [`SimWorld`] creates one [`SimRuntime`] per participant. Each participant
//! owns its datatype registry, as MPI processes do, while mailboxes, files and
//! the barrier are shared, so participants can run on separate threads and
//! exchange data with the usual blocking semantics.
//!
//! Datatypes carry exact typemaps: sizes, bounds and the byte segments a
//! transfer touches are computed from the same contiguous / vector / struct
//! description MPI uses, and transfers through uncommitted types fail. A
//! configurable native count limit scales the 32-bit cap down so that the
//! large-count machinery can be exercised on buffers of a few bytes.
//!
//! For testing failure paths every participant records a [`TraceEntry`] per
//! runtime call and accepts injected [`Fault`]s.
//!
//! # Example
//!
//! ```
//! use largecount::sim::{SimType, SimWorld};
//! use largecount::{LargeCount, Limits};
//!
//! let world = SimWorld::with_native_limit(2, 8);
//! let handles: Vec<_> = world
//!     .into_iter()
//!     .map(|rt| {
//!         std::thread::spawn(move || {
//!             let limits = Limits::default().with_threshold(8).with_max_block(7);
//!             let lc = LargeCount::with_limits(&rt, limits).unwrap();
//!             let comm = rt.world();
//!             let mut buf = vec![rt.rank() as u8; 20];
//!             lc.broadcast(&mut buf, 20, SimType::BYTE, 0, &comm).unwrap();
//!             buf
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     assert_eq!(h.join().unwrap(), vec![0u8; 20]);
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::datatype::Element;
use crate::runtime::{RawResult, Runtime};
use crate::status::Status;

/// Status codes returned by the simulated runtime (MPICH numbering).
pub mod code {
    /// Invalid buffer, or the datatype reaches outside it
    pub const ERR_BUFFER: i32 = 1;
    /// Negative count or count above the native limit
    pub const ERR_COUNT: i32 = 2;
    /// Unknown, predefined (on free) or uncommitted (on transfer) datatype
    pub const ERR_TYPE: i32 = 3;
    /// Invalid tag
    pub const ERR_TAG: i32 = 4;
    /// Invalid rank
    pub const ERR_RANK: i32 = 6;
    /// Invalid root
    pub const ERR_ROOT: i32 = 7;
    /// Invalid argument
    pub const ERR_ARG: i32 = 12;
    /// Message longer than the receive buffer
    pub const ERR_TRUNCATE: i32 = 14;
    /// Internal error
    pub const ERR_INTERN: i32 = 16;
    /// Unknown file
    pub const ERR_FILE: i32 = 27;
}

/// Wildcard source for [`Runtime::recv`].
pub const ANY_SOURCE: i32 = -2;
/// Wildcard tag for [`Runtime::recv`].
pub const ANY_TAG: i32 = -1;

/// Tags below zero are reserved for collectives.
const BCAST_TAG: i32 = i32::MIN;

/// Datatype handle of the simulated runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimType(u32);

impl SimType {
    /// One byte (`MPI_BYTE`)
    pub const BYTE: SimType = SimType(1);
    /// Two bytes (`MPI_SHORT`)
    pub const SHORT: SimType = SimType(2);
    /// Four bytes (`MPI_INT`)
    pub const INT: SimType = SimType(3);
    /// Eight bytes (`MPI_DOUBLE`)
    pub const DOUBLE: SimType = SimType(4);

    const PREDEFINED: [(SimType, i64); 4] = [
        (SimType::BYTE, 1),
        (SimType::SHORT, 2),
        (SimType::INT, 4),
        (SimType::DOUBLE, 8),
    ];
    const FIRST_DERIVED: u32 = 16;

    /// The predefined type with the size of `T`.
    pub fn of<T: Element>() -> SimType {
        match std::mem::size_of::<T>() {
            1 => SimType::BYTE,
            2 => SimType::SHORT,
            4 => SimType::INT,
            _ => SimType::DOUBLE,
        }
    }

    /// The raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Communicator of the simulated world.
#[derive(Debug, Clone)]
pub struct SimComm {
    size: i32,
}

impl SimComm {
    /// Number of participants.
    pub fn size(&self) -> i32 {
        self.size
    }
}

/// Handle to a shared in-memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFile {
    name: String,
}

impl SimFile {
    /// Name the file was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runtime entry points, for the call trace and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`Runtime::type_size`]
    TypeSize,
    /// [`Runtime::type_contiguous`]
    TypeContiguous,
    /// [`Runtime::type_vector`]
    TypeVector,
    /// [`Runtime::type_create_struct`]
    TypeCreateStruct,
    /// [`Runtime::type_commit`]
    TypeCommit,
    /// [`Runtime::type_free`]
    TypeFree,
    /// [`Runtime::send`]
    Send,
    /// [`Runtime::recv`]
    Recv,
    /// [`Runtime::bcast`]
    Bcast,
    /// [`Runtime::file_write_at`]
    FileWriteAt,
    /// [`Runtime::file_write_at_all`]
    FileWriteAtAll,
    /// [`Runtime::file_write_ordered`]
    FileWriteOrdered,
    /// [`Runtime::file_read_at`]
    FileReadAt,
    /// [`Runtime::file_read_at_all`]
    FileReadAtAll,
}

/// One recorded runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Which entry point
    pub call: Call,
    /// The count argument, for calls that take one
    pub count: Option<i32>,
}

/// Misbehaviour to inject into a runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with this status code without doing anything.
    Fail(i32),
    /// Succeed, but report a type size off by this many bytes
    /// (only meaningful for [`Call::TypeSize`]).
    SkewSize(i64),
}

#[derive(Debug)]
struct FaultPoint {
    call: Call,
    skip: usize,
    fault: Fault,
}

// ============================================================================
// Typemaps
// ============================================================================

#[derive(Debug)]
enum Layout {
    Basic {
        size: i64,
    },
    Contiguous {
        count: i64,
        inner: Arc<Layout>,
    },
    Vector {
        count: i64,
        blocklength: i64,
        stride: i64,
        inner: Arc<Layout>,
    },
    Struct {
        fields: Vec<Field>,
    },
}

#[derive(Debug)]
struct Field {
    blocklength: i64,
    displacement: i64,
    layout: Arc<Layout>,
}

impl Layout {
    /// Bytes of data, holes excluded.
    fn size(&self) -> i64 {
        match self {
            Layout::Basic { size } => *size,
            Layout::Contiguous { count, inner } => count * inner.size(),
            Layout::Vector {
                count,
                blocklength,
                inner,
                ..
            } => count * blocklength * inner.size(),
            Layout::Struct { fields } => fields
                .iter()
                .map(|f| f.blocklength * f.layout.size())
                .sum(),
        }
    }

    /// `(lb, ub)` in bytes; an empty typemap has both at zero.
    fn bounds(&self) -> (i64, i64) {
        match self {
            Layout::Basic { size } => (0, *size),
            Layout::Contiguous { count, inner } => {
                if *count == 0 {
                    return (0, 0);
                }
                let (lb, _) = inner.bounds();
                (lb, lb + count * inner.extent())
            }
            Layout::Vector {
                count,
                blocklength,
                stride,
                inner,
            } => {
                if *count == 0 || *blocklength == 0 {
                    return (0, 0);
                }
                let (lb, _) = inner.bounds();
                let extent = inner.extent();
                let last = (count - 1) * stride * extent;
                (
                    lb + last.min(0),
                    lb + last.max(0) + blocklength * extent,
                )
            }
            Layout::Struct { fields } => fields
                .iter()
                .filter(|f| f.blocklength > 0)
                .map(|f| {
                    let (lb, _) = f.layout.bounds();
                    let start = f.displacement + lb;
                    (start, start + f.blocklength * f.layout.extent())
                })
                .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
                .unwrap_or((0, 0)),
        }
    }

    fn extent(&self) -> i64 {
        let (lb, ub) = self.bounds();
        ub - lb
    }

    /// The data occupies `[lb, lb + size)` without holes.
    fn dense(&self) -> bool {
        match self {
            Layout::Basic { .. } => true,
            Layout::Contiguous { inner, .. } => inner.dense(),
            Layout::Vector {
                count,
                blocklength,
                stride,
                inner,
            } => inner.dense() && (*count <= 1 || stride == blocklength),
            Layout::Struct { .. } => false,
        }
    }

    /// Append the byte ranges of one element placed at `base`, in typemap order.
    fn segments(&self, base: i64, out: &mut Vec<(i64, i64)>) {
        if self.dense() {
            push_segment(out, base + self.bounds().0, self.size());
            return;
        }
        match self {
            Layout::Basic { size } => push_segment(out, base, *size),
            Layout::Contiguous { count, inner } => {
                let extent = inner.extent();
                for i in 0..*count {
                    inner.segments(base + i * extent, out);
                }
            }
            Layout::Vector {
                count,
                blocklength,
                stride,
                inner,
            } => {
                let extent = inner.extent();
                for i in 0..*count {
                    for j in 0..*blocklength {
                        inner.segments(base + (i * stride + j) * extent, out);
                    }
                }
            }
            Layout::Struct { fields } => {
                for f in fields {
                    let extent = f.layout.extent();
                    for j in 0..f.blocklength {
                        f.layout.segments(base + f.displacement + j * extent, out);
                    }
                }
            }
        }
    }

    /// Byte ranges of `count` consecutive elements starting at offset zero.
    fn copies(&self, count: i64) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        if self.dense() {
            push_segment(&mut out, self.bounds().0, count * self.size());
            return out;
        }
        let extent = self.extent();
        for i in 0..count {
            self.segments(i * extent, &mut out);
        }
        out
    }
}

fn push_segment(out: &mut Vec<(i64, i64)>, start: i64, len: i64) {
    if len == 0 {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.0 + last.1 == start {
            last.1 += len;
            return;
        }
    }
    out.push((start, len));
}

fn pack(buf: &[u8], segments: &[(i64, i64)]) -> Vec<u8> {
    let mut data = Vec::with_capacity(segments.iter().map(|s| s.1 as usize).sum());
    for &(start, len) in segments {
        data.extend_from_slice(&buf[start as usize..(start + len) as usize]);
    }
    data
}

/// Scatter `data` over the segments in order; returns the bytes placed.
fn unpack(buf: &mut [u8], segments: &[(i64, i64)], data: &[u8]) -> usize {
    let mut placed = 0;
    for &(start, len) in segments {
        if placed == data.len() {
            break;
        }
        let n = (len as usize).min(data.len() - placed);
        let start = start as usize;
        buf[start..start + n].copy_from_slice(&data[placed..placed + n]);
        placed += n;
    }
    placed
}

struct TypeEntry {
    layout: Arc<Layout>,
    committed: bool,
    predefined: bool,
}

struct Registry {
    types: HashMap<SimType, TypeEntry>,
    next: u32,
}

impl Registry {
    fn new() -> Self {
        let types = SimType::PREDEFINED
            .iter()
            .map(|&(ty, size)| {
                (
                    ty,
                    TypeEntry {
                        layout: Arc::new(Layout::Basic { size }),
                        committed: true,
                        predefined: true,
                    },
                )
            })
            .collect();
        Registry {
            types,
            next: SimType::FIRST_DERIVED,
        }
    }
}

// ============================================================================
// Shared world state
// ============================================================================

struct Envelope {
    source: i32,
    tag: i32,
    data: Vec<u8>,
}

#[derive(Default)]
struct FileState {
    data: Vec<u8>,
    shared_pointer: i64,
    turn: i32,
}

#[derive(Default)]
struct BarrierState {
    arrived: i32,
    generation: u64,
}

struct Shared {
    size: i32,
    mailboxes: Mutex<HashMap<i32, VecDeque<Envelope>>>,
    mail_arrived: Condvar,
    files: Mutex<HashMap<String, FileState>>,
    file_turn: Condvar,
    barrier: Mutex<BarrierState>,
    barrier_done: Condvar,
}

/// Constructor for a set of connected participants.
pub struct SimWorld;

impl SimWorld {
    /// `size` participants with the full 32-bit native count range.
    pub fn new(size: usize) -> Vec<SimRuntime> {
        SimWorld::with_native_limit(size, i32::MAX)
    }

    /// `size` participants whose primitives reject counts above `limit`.
    pub fn with_native_limit(size: usize, limit: i32) -> Vec<SimRuntime> {
        let size = i32::try_from(size).unwrap_or(i32::MAX);
        let shared = Arc::new(Shared {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            mail_arrived: Condvar::new(),
            files: Mutex::new(HashMap::new()),
            file_turn: Condvar::new(),
            barrier: Mutex::new(BarrierState::default()),
            barrier_done: Condvar::new(),
        });
        (0..size)
            .map(|rank| SimRuntime {
                rank,
                shared: Arc::clone(&shared),
                native_limit: limit,
                registry: Mutex::new(Registry::new()),
                faults: Mutex::new(Vec::new()),
                trace: Mutex::new(Vec::new()),
            })
            .collect()
    }
}

/// One participant of a [`SimWorld`].
pub struct SimRuntime {
    rank: i32,
    shared: Arc<Shared>,
    native_limit: i32,
    registry: Mutex<Registry>,
    faults: Mutex<Vec<FaultPoint>>,
    trace: Mutex<Vec<TraceEntry>>,
}

impl SimRuntime {
    /// Rank of this participant.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of participants.
    pub fn size(&self) -> i32 {
        self.shared.size
    }

    /// The communicator containing every participant.
    pub fn world(&self) -> SimComm {
        SimComm {
            size: self.shared.size,
        }
    }

    /// Largest count the primitives accept.
    pub fn native_limit(&self) -> i32 {
        self.native_limit
    }

    /// Block until every participant has called `barrier`.
    pub fn barrier(&self) {
        let mut state = self.shared.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.barrier_done.notify_all();
            return;
        }
        while state.generation == generation {
            self.shared.barrier_done.wait(&mut state);
        }
    }

    /// Open (creating if needed) a file shared by all participants.
    pub fn file_open(&self, name: &str) -> SimFile {
        self.shared
            .files
            .lock()
            .entry(name.to_string())
            .or_default();
        SimFile {
            name: name.to_string(),
        }
    }

    /// Current contents of a shared file.
    pub fn file_contents(&self, fh: &SimFile) -> Vec<u8> {
        self.shared
            .files
            .lock()
            .get(&fh.name)
            .map(|f| f.data.clone())
            .unwrap_or_default()
    }

    /// Number of derived datatypes currently registered on this participant.
    pub fn live_types(&self) -> usize {
        self.registry
            .lock()
            .types
            .values()
            .filter(|t| !t.predefined)
            .count()
    }

    /// Whether `datatype` exists and is committed.
    pub fn is_committed(&self, datatype: SimType) -> bool {
        self.registry
            .lock()
            .types
            .get(&datatype)
            .is_some_and(|t| t.committed)
    }

    /// `(lb, extent)` of a datatype in bytes (`MPI_Type_get_extent_x`).
    pub fn type_extent(&self, datatype: SimType) -> RawResult<(i64, i64)> {
        let layout = self.layout(datatype, false)?;
        let (lb, ub) = layout.bounds();
        Ok((lb, ub - lb))
    }

    /// Calls made on this participant so far.
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().clone()
    }

    /// Forget the recorded calls.
    pub fn clear_trace(&self) {
        self.trace.lock().clear();
    }

    /// Apply `fault` to the next call of kind `call`.
    pub fn inject(&self, call: Call, fault: Fault) {
        self.inject_nth(call, 0, fault);
    }

    /// Apply `fault` to the call of kind `call` after letting `skip` of them through.
    pub fn inject_nth(&self, call: Call, skip: usize, fault: Fault) {
        self.faults.lock().push(FaultPoint { call, skip, fault });
    }

    /// Record the call and consult injected faults; `Ok` carries a size skew.
    fn enter(&self, call: Call, count: Option<i32>) -> RawResult<i64> {
        self.trace.lock().push(TraceEntry { call, count });
        let mut faults = self.faults.lock();
        let Some(pos) = faults.iter().position(|f| f.call == call) else {
            return Ok(0);
        };
        if faults[pos].skip > 0 {
            faults[pos].skip -= 1;
            return Ok(0);
        }
        match faults.remove(pos).fault {
            Fault::Fail(code) => Err(code),
            Fault::SkewSize(delta) => Ok(delta),
        }
    }

    fn check_count(&self, count: i32) -> RawResult<()> {
        if count < 0 || count > self.native_limit {
            return Err(code::ERR_COUNT);
        }
        Ok(())
    }

    fn layout(&self, datatype: SimType, need_commit: bool) -> RawResult<Arc<Layout>> {
        let registry = self.registry.lock();
        match registry.types.get(&datatype) {
            Some(entry) if entry.committed || !need_commit => Ok(Arc::clone(&entry.layout)),
            _ => Err(code::ERR_TYPE),
        }
    }

    fn register(&self, layout: Layout) -> SimType {
        let mut registry = self.registry.lock();
        let ty = SimType(registry.next);
        registry.next += 1;
        registry.types.insert(
            ty,
            TypeEntry {
                layout: Arc::new(layout),
                committed: false,
                predefined: false,
            },
        );
        ty
    }

    /// Byte ranges of a transfer, checked against the buffer length.
    fn segments(&self, datatype: SimType, count: i32, buf_len: usize) -> RawResult<Vec<(i64, i64)>> {
        self.check_count(count)?;
        let layout = self.layout(datatype, true)?;
        let segments = layout.copies(i64::from(count));
        if segments
            .iter()
            .any(|&(start, len)| start < 0 || start + len > buf_len as i64)
        {
            return Err(code::ERR_BUFFER);
        }
        Ok(segments)
    }

    fn check_rank(&self, rank: i32, err: i32) -> RawResult<()> {
        if (0..self.shared.size).contains(&rank) {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn deliver(&self, dest: i32, envelope: Envelope) {
        self.shared
            .mailboxes
            .lock()
            .entry(dest)
            .or_default()
            .push_back(envelope);
        self.shared.mail_arrived.notify_all();
    }

    /// Block until a message matching `source`/`tag` is queued for this rank.
    fn take(&self, source: i32, tag: i32) -> Envelope {
        let mut mailboxes = self.shared.mailboxes.lock();
        loop {
            let queue = mailboxes.entry(self.rank).or_default();
            let found = queue.iter().position(|e| {
                (source == ANY_SOURCE || e.source == source)
                    && ((tag == ANY_TAG && e.tag >= 0) || e.tag == tag)
            });
            if let Some(pos) = found {
                if let Some(envelope) = queue.remove(pos) {
                    return envelope;
                }
            }
            self.shared.mail_arrived.wait(&mut mailboxes);
        }
    }

    fn file<'a>(
        files: &'a mut MutexGuard<'_, HashMap<String, FileState>>,
        fh: &SimFile,
    ) -> RawResult<&'a mut FileState> {
        files.get_mut(&fh.name).ok_or(code::ERR_FILE)
    }

    fn write_file(&self, fh: &SimFile, offset: i64, data: &[u8]) -> RawResult<()> {
        if offset < 0 {
            return Err(code::ERR_ARG);
        }
        let mut files = self.shared.files.lock();
        let file = Self::file(&mut files, fh)?;
        write_bytes(&mut file.data, offset as usize, data);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_at(
        &self,
        call: Call,
        fh: &SimFile,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.enter(call, Some(count))?;
        let segments = self.segments(datatype, count, buf.len())?;
        let data = pack(buf, &segments);
        self.write_file(fh, offset, &data)?;
        self.fill_file_status(status, data.len());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_at(
        &self,
        call: Call,
        fh: &SimFile,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.enter(call, Some(count))?;
        if offset < 0 {
            return Err(code::ERR_ARG);
        }
        let segments = self.segments(datatype, count, buf.len())?;
        let wanted: i64 = segments.iter().map(|s| s.1).sum();
        let data = {
            let mut files = self.shared.files.lock();
            let file = Self::file(&mut files, fh)?;
            let start = (offset as usize).min(file.data.len());
            let end = (offset.saturating_add(wanted) as usize).min(file.data.len());
            file.data[start..end].to_vec()
        };
        let placed = unpack(buf, &segments, &data);
        self.fill_file_status(status, placed);
        Ok(())
    }

    fn fill_file_status(&self, status: Option<&mut Status>, bytes: usize) {
        if let Some(status) = status {
            *status = Status {
                source: self.rank,
                tag: 0,
                bytes: bytes as i64,
            };
        }
    }
}

fn write_bytes(file: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if file.len() < end {
        file.resize(end, 0);
    }
    file[offset..end].copy_from_slice(data);
}

impl Runtime for SimRuntime {
    type Datatype = SimType;
    type Comm = SimComm;
    type File = SimFile;

    fn type_size(&self, datatype: SimType) -> RawResult<i64> {
        let skew = self.enter(Call::TypeSize, None)?;
        Ok(self.layout(datatype, false)?.size() + skew)
    }

    fn type_contiguous(&self, count: i32, oldtype: SimType) -> RawResult<SimType> {
        self.enter(Call::TypeContiguous, Some(count))?;
        self.check_count(count)?;
        let inner = self.layout(oldtype, false)?;
        Ok(self.register(Layout::Contiguous {
            count: i64::from(count),
            inner,
        }))
    }

    fn type_vector(
        &self,
        count: i32,
        blocklength: i32,
        stride: i32,
        oldtype: SimType,
    ) -> RawResult<SimType> {
        self.enter(Call::TypeVector, Some(count))?;
        self.check_count(count)?;
        self.check_count(blocklength)?;
        let inner = self.layout(oldtype, false)?;
        Ok(self.register(Layout::Vector {
            count: i64::from(count),
            blocklength: i64::from(blocklength),
            stride: i64::from(stride),
            inner,
        }))
    }

    fn type_create_struct(
        &self,
        blocklengths: &[i32],
        displacements: &[i64],
        types: &[SimType],
    ) -> RawResult<SimType> {
        self.enter(Call::TypeCreateStruct, None)?;
        if blocklengths.len() != displacements.len() || blocklengths.len() != types.len() {
            return Err(code::ERR_ARG);
        }
        let mut fields = Vec::with_capacity(types.len());
        for ((&blocklength, &displacement), &ty) in
            blocklengths.iter().zip(displacements).zip(types)
        {
            self.check_count(blocklength)?;
            fields.push(Field {
                blocklength: i64::from(blocklength),
                displacement,
                layout: self.layout(ty, false)?,
            });
        }
        Ok(self.register(Layout::Struct { fields }))
    }

    fn type_commit(&self, datatype: SimType) -> RawResult<()> {
        self.enter(Call::TypeCommit, None)?;
        let mut registry = self.registry.lock();
        let entry = registry.types.get_mut(&datatype).ok_or(code::ERR_TYPE)?;
        entry.committed = true;
        Ok(())
    }

    fn type_free(&self, datatype: SimType) -> RawResult<()> {
        self.enter(Call::TypeFree, None)?;
        let mut registry = self.registry.lock();
        match registry.types.get(&datatype) {
            Some(entry) if !entry.predefined => {
                registry.types.remove(&datatype);
                Ok(())
            }
            _ => Err(code::ERR_TYPE),
        }
    }

    fn internal_error_code(&self) -> i32 {
        code::ERR_INTERN
    }

    fn send(
        &self,
        buf: &[u8],
        count: i32,
        datatype: SimType,
        dest: i32,
        tag: i32,
        _comm: &SimComm,
    ) -> RawResult<()> {
        self.enter(Call::Send, Some(count))?;
        self.check_rank(dest, code::ERR_RANK)?;
        if tag < 0 {
            return Err(code::ERR_TAG);
        }
        let segments = self.segments(datatype, count, buf.len())?;
        self.deliver(
            dest,
            Envelope {
                source: self.rank,
                tag,
                data: pack(buf, &segments),
            },
        );
        Ok(())
    }

    fn recv(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: SimType,
        source: i32,
        tag: i32,
        _comm: &SimComm,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.enter(Call::Recv, Some(count))?;
        if source != ANY_SOURCE {
            self.check_rank(source, code::ERR_RANK)?;
        }
        if tag < 0 && tag != ANY_TAG {
            return Err(code::ERR_TAG);
        }
        let segments = self.segments(datatype, count, buf.len())?;
        let capacity: i64 = segments.iter().map(|s| s.1).sum();
        let envelope = self.take(source, tag);
        let placed = unpack(buf, &segments, &envelope.data);
        if let Some(status) = status {
            *status = Status {
                source: envelope.source,
                tag: envelope.tag,
                bytes: placed as i64,
            };
        }
        if envelope.data.len() as i64 > capacity {
            return Err(code::ERR_TRUNCATE);
        }
        Ok(())
    }

    fn bcast(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: SimType,
        root: i32,
        _comm: &SimComm,
    ) -> RawResult<()> {
        self.enter(Call::Bcast, Some(count))?;
        self.check_rank(root, code::ERR_ROOT)?;
        let segments = self.segments(datatype, count, buf.len())?;
        if self.rank == root {
            let data = pack(buf, &segments);
            for dest in (0..self.shared.size).filter(|&r| r != root) {
                self.deliver(
                    dest,
                    Envelope {
                        source: root,
                        tag: BCAST_TAG,
                        data: data.clone(),
                    },
                );
            }
            return Ok(());
        }
        let envelope = self.take(root, BCAST_TAG);
        let placed = unpack(buf, &segments, &envelope.data);
        if placed != envelope.data.len() {
            return Err(code::ERR_TRUNCATE);
        }
        Ok(())
    }

    fn file_write_at(
        &self,
        fh: &SimFile,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.write_at(Call::FileWriteAt, fh, offset, buf, count, datatype, status)
    }

    fn file_write_at_all(
        &self,
        fh: &SimFile,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.write_at(Call::FileWriteAtAll, fh, offset, buf, count, datatype, status)
    }

    fn file_write_ordered(
        &self,
        fh: &SimFile,
        buf: &[u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.enter(Call::FileWriteOrdered, Some(count))?;
        let segments = self.segments(datatype, count, buf.len())?;
        let data = pack(buf, &segments);
        let mut files = self.shared.files.lock();
        loop {
            let file = Self::file(&mut files, fh)?;
            if file.turn == self.rank {
                let offset = file.shared_pointer as usize;
                write_bytes(&mut file.data, offset, &data);
                file.shared_pointer += data.len() as i64;
                file.turn = (file.turn + 1) % self.shared.size;
                break;
            }
            self.shared.file_turn.wait(&mut files);
        }
        drop(files);
        self.shared.file_turn.notify_all();
        self.fill_file_status(status, data.len());
        Ok(())
    }

    fn file_read_at(
        &self,
        fh: &SimFile,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.read_at(Call::FileReadAt, fh, offset, buf, count, datatype, status)
    }

    fn file_read_at_all(
        &self,
        fh: &SimFile,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: SimType,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.read_at(Call::FileReadAtAll, fh, offset, buf, count, datatype, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solo() -> SimRuntime {
        SimWorld::new(1).remove(0)
    }

    #[test]
    fn predefined_sizes() {
        let rt = solo();
        assert_eq!(rt.type_size(SimType::BYTE), Ok(1));
        assert_eq!(rt.type_size(SimType::SHORT), Ok(2));
        assert_eq!(rt.type_size(SimType::INT), Ok(4));
        assert_eq!(rt.type_size(SimType::DOUBLE), Ok(8));
        assert_eq!(rt.type_free(SimType::INT), Err(code::ERR_TYPE));
        assert_eq!(rt.live_types(), 0);
        assert_eq!(SimType::of::<i16>(), SimType::SHORT);
        assert_eq!(SimType::of::<f32>(), SimType::INT);
        assert_eq!(SimType::of::<u64>(), SimType::DOUBLE);
    }

    #[test]
    fn strided_vector_has_holes() {
        let rt = solo();
        let v = rt.type_vector(3, 2, 4, SimType::SHORT).unwrap();
        assert_eq!(rt.type_size(v), Ok(12));
        assert_eq!(rt.type_extent(v), Ok((0, 20)));
        let layout = rt.layout(v, false).unwrap();
        assert_eq!(layout.copies(1), vec![(0, 4), (8, 4), (16, 4)]);
        rt.type_free(v).unwrap();
    }

    #[test]
    fn struct_with_empty_field() {
        let rt = solo();
        let chunk = rt.type_vector(2, 3, 3, SimType::BYTE).unwrap();
        let empty = rt.type_contiguous(0, SimType::BYTE).unwrap();
        let s = rt
            .type_create_struct(&[1, 1], &[0, 6], &[chunk, empty])
            .unwrap();
        rt.type_free(chunk).unwrap();
        rt.type_free(empty).unwrap();
        // The struct keeps its own copy of the field layouts.
        assert_eq!(rt.type_size(s), Ok(6));
        assert_eq!(rt.type_extent(s), Ok((0, 6)));
        assert_eq!(rt.layout(s, false).unwrap().copies(2), vec![(0, 12)]);
        rt.type_free(s).unwrap();
    }

    #[test]
    fn uncommitted_types_cannot_transfer() {
        let rt = solo();
        let comm = rt.world();
        let ty = rt.type_contiguous(4, SimType::BYTE).unwrap();
        assert_eq!(rt.send(&[0; 4], 1, ty, 0, 0, &comm), Err(code::ERR_TYPE));
        rt.type_commit(ty).unwrap();
        assert_eq!(rt.send(&[0; 4], 1, ty, 0, 0, &comm), Ok(()));
        let mut out = [9u8; 4];
        rt.recv(&mut out, 4, SimType::BYTE, 0, 0, &comm, None).unwrap();
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn native_limit_and_buffer_bounds() {
        let rt = SimWorld::with_native_limit(1, 8).remove(0);
        let comm = rt.world();
        assert_eq!(rt.send(&[0; 9], 9, SimType::BYTE, 0, 0, &comm), Err(code::ERR_COUNT));
        assert_eq!(rt.send(&[0; 4], 8, SimType::BYTE, 0, 0, &comm), Err(code::ERR_BUFFER));
        assert_eq!(rt.type_contiguous(-1, SimType::BYTE), Err(code::ERR_COUNT));
    }

    #[test]
    fn recv_truncation_and_wildcards() {
        let rt = solo();
        let comm = rt.world();
        rt.send(&[1, 2, 3, 4], 4, SimType::BYTE, 0, 5, &comm).unwrap();
        let mut out = [0u8; 2];
        let mut status = Status::default();
        let err = rt
            .recv(&mut out, 2, SimType::BYTE, ANY_SOURCE, ANY_TAG, &comm, Some(&mut status))
            .unwrap_err();
        assert_eq!(err, code::ERR_TRUNCATE);
        assert_eq!(out, [1, 2]);
        assert_eq!(status.tag, 5);
        assert_eq!(status.bytes, 2);
    }

    #[test]
    fn fault_injection_skips_then_fires_once() {
        let rt = solo();
        rt.inject_nth(Call::TypeSize, 1, Fault::Fail(99));
        assert_eq!(rt.type_size(SimType::BYTE), Ok(1));
        assert_eq!(rt.type_size(SimType::BYTE), Err(99));
        assert_eq!(rt.type_size(SimType::BYTE), Ok(1));
        rt.inject(Call::TypeSize, Fault::SkewSize(3));
        assert_eq!(rt.type_size(SimType::BYTE), Ok(4));
        assert_eq!(rt.trace().len(), 4);
        rt.clear_trace();
        assert!(rt.trace().is_empty());
    }

    #[test]
    fn file_reads_stop_at_end_of_file() {
        let rt = solo();
        let fh = rt.file_open("eof.data");
        rt.file_write_at(&fh, 2, &[7, 8], 2, SimType::BYTE, None)
            .unwrap();
        assert_eq!(rt.file_contents(&fh), vec![0, 0, 7, 8]);
        let mut out = [1u8; 6];
        let mut status = Status::default();
        rt.file_read_at(&fh, 1, &mut out, 6, SimType::BYTE, Some(&mut status))
            .unwrap();
        assert_eq!(out, [0, 7, 8, 1, 1, 1]);
        assert_eq!(status.bytes, 3);
        let missing = SimFile {
            name: "missing".into(),
        };
        assert_eq!(
            rt.file_write_at(&missing, 0, &[1], 1, SimType::BYTE, None),
            Err(code::ERR_FILE)
        );
    }
}
