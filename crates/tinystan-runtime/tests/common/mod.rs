//! Shared test utilities
//!
//! `FakeStan` is a deterministic in-process TinyStan module: an emulated
//! heap with allocation accounting, call counters, error injection and
//! scripted print output. Clones share state, so a test can keep a handle
//! for inspection after the binding that owns the module is dropped.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tinystan_runtime::ffi::{
    CStrPtr, ErrorPtr, ErrorSlot, F64Ptr, ForeignModule, ModelPtr, PathfinderArgs, PrintHook,
    RawPtr, SampleArgs,
};

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// Separator byte the fake reports, as TinyStan does
pub const FAKE_SEPARATOR: u8 = 0x1C;

const HEAP_BASE: usize = 0x1000;
const ALIGN: usize = 16;

/// Behavior of a `FakeStan`
#[derive(Debug, Clone)]
pub struct FakeConfig {
    /// Comma separated list returned by `model_param_names`
    pub param_names: String,
    pub free_params: usize,
    /// Message of the error `create_model` fails with
    pub fail_create: Option<String>,
    /// Message of the error `sample` / `pathfinder` fail with
    pub fail_run: Option<String>,
    /// Error category attached to injected errors
    pub error_type: i32,
    /// Lines printed through the hook during each run
    pub print_lines: Vec<String>,
    /// Number of allocations that succeed before `malloc` returns null
    pub malloc_limit: Option<usize>,
    pub stan_version: (i32, i32, i32),
    pub api_version: (i32, i32, i32),
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            param_names: "theta".to_string(),
            free_params: 1,
            fail_create: None,
            fail_run: None,
            error_type: 0,
            print_lines: Vec::new(),
            malloc_limit: None,
            stan_version: (2, 35, 0),
            api_version: (0, 1, 0),
        }
    }
}

/// Counts of calls across the boundary
#[derive(Debug, Default)]
pub struct Calls {
    pub malloc: Cell<usize>,
    pub free: Cell<usize>,
    pub bad_free: Cell<usize>,
    pub create_model: Cell<usize>,
    pub destroy_model: Cell<usize>,
    pub destroy_error: Cell<usize>,
    pub sample: Cell<usize>,
    pub pathfinder: Cell<usize>,
}

fn bump(cell: &Cell<usize>) {
    cell.set(cell.get() + 1);
}

#[derive(Default)]
struct Heap {
    next: usize,
    /// Caller allocations made through `malloc`
    blocks: HashMap<usize, Vec<u8>>,
    /// Strings owned by the module (names, error messages)
    owned: HashMap<usize, Vec<u8>>,
    models: HashMap<usize, usize>,
    errors: HashMap<usize, (i32, usize)>,
}

impl Heap {
    fn reserve(&mut self, n_bytes: usize) -> usize {
        if self.next == 0 {
            self.next = HEAP_BASE;
        }
        let addr = self.next;
        self.next += (n_bytes.max(1) + ALIGN - 1) / ALIGN * ALIGN;
        addr
    }

    fn own_cstr(&mut self, text: &str) -> usize {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let addr = self.reserve(bytes.len());
        self.owned.insert(addr, bytes);
        addr
    }

    fn block(&self, addr: usize) -> &Vec<u8> {
        self.blocks
            .get(&addr)
            .or_else(|| self.owned.get(&addr))
            .unwrap_or_else(|| panic!("read of unknown address {:#x}", addr))
    }

    fn block_mut(&mut self, addr: usize) -> &mut Vec<u8> {
        self.blocks
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("write to unknown address {:#x}", addr))
    }

    fn write_f64s(&mut self, addr: usize, values: &[f64]) {
        let block = self.block_mut(addr);
        assert!(block.len() >= values.len() * 8, "output buffer too small");
        for (i, value) in values.iter().enumerate() {
            block[i * 8..i * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn write_usize(&mut self, addr: usize, value: usize) {
        let bytes = (value as u64).to_le_bytes();
        self.block_mut(addr)[..8].copy_from_slice(&bytes);
    }

    fn cstr(&self, addr: usize) -> Vec<u8> {
        self.block(addr).iter().take_while(|b| **b != 0).copied().collect()
    }

    fn new_error(&mut self, kind: i32, message: &str) -> usize {
        let message = self.own_cstr(message);
        let token = self.reserve(8);
        self.errors.insert(token, (kind, message));
        token
    }
}

struct Inner {
    config: FakeConfig,
    heap: RefCell<Heap>,
    hook: RefCell<Option<PrintHook>>,
    calls: Calls,
    last_inits: RefCell<Option<Vec<u8>>>,
    last_seed: Cell<Option<u32>>,
    last_metric_len: Cell<usize>,
}

/// Deterministic stand-in for a compiled model
#[derive(Clone)]
pub struct FakeStan {
    inner: Rc<Inner>,
}

impl FakeStan {
    pub fn new(config: FakeConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                heap: RefCell::new(Heap::default()),
                hook: RefCell::new(None),
                calls: Calls::default(),
                last_inits: RefCell::new(None),
                last_seed: Cell::new(None),
                last_metric_len: Cell::new(0),
            }),
        }
    }

    pub fn calls(&self) -> &Calls {
        &self.inner.calls
    }

    /// Caller allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.inner.heap.borrow().blocks.len()
    }

    pub fn live_models(&self) -> usize {
        self.inner.heap.borrow().models.len()
    }

    pub fn live_errors(&self) -> usize {
        self.inner.heap.borrow().errors.len()
    }

    /// Calls of any `tinystan_*` entry point or allocator
    pub fn boundary_calls(&self) -> usize {
        let c = &self.inner.calls;
        c.malloc.get() + c.create_model.get() + c.sample.get() + c.pathfinder.get()
    }

    pub fn hook_installed(&self) -> bool {
        self.inner.hook.borrow().is_some()
    }

    /// Init string seen by the last run, if one was passed
    pub fn last_inits(&self) -> Option<Vec<u8>> {
        self.inner.last_inits.borrow().clone()
    }

    pub fn last_seed(&self) -> Option<u32> {
        self.inner.last_seed.get()
    }

    pub fn last_metric_len(&self) -> usize {
        self.inner.last_metric_len.get()
    }

    /// Assert nothing the binding owned is still outstanding
    pub fn assert_clean(&self) {
        assert_eq!(self.live_allocations(), 0, "leaked foreign buffers");
        assert_eq!(self.live_models(), 0, "leaked model handles");
        assert_eq!(self.live_errors(), 0, "leaked error objects");
        assert_eq!(self.calls().bad_free.get(), 0, "freed an unknown pointer");
    }

    /// Value the fake writes for variable `var` of draw `draw`
    pub fn draw_value(seed: u32, var: usize, draw: usize) -> f64 {
        var as f64 * 1000.0 + draw as f64 + f64::from(seed % 97) / 100.0
    }

    fn n_model_names(&self) -> usize {
        self.inner
            .config
            .param_names
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .count()
    }

    fn emit(&self, line: &str) {
        if let Some(hook) = self.inner.hook.borrow_mut().as_mut() {
            hook(line);
        }
    }

    fn record_inits(&self, inits: CStrPtr) {
        let seen = if inits.is_null() {
            None
        } else {
            Some(self.inner.heap.borrow().cstr(inits.addr()))
        };
        *self.inner.last_inits.borrow_mut() = seen;
    }

    /// Print the scripted lines, then either fail or fill `out`
    fn run(&self, err: ErrorSlot, out: F64Ptr, seed: u32, n_vars: usize, n_draws: usize) -> i32 {
        self.inner.last_seed.set(Some(seed));
        for line in &self.inner.config.print_lines {
            self.emit(line);
        }

        let mut heap = self.inner.heap.borrow_mut();
        if let Some(message) = &self.inner.config.fail_run {
            let token = heap.new_error(self.inner.config.error_type, message);
            heap.write_usize(err.ptr().addr(), token);
            return -1;
        }

        let mut flat = vec![0.0; n_vars * n_draws];
        for draw in 0..n_draws {
            for var in 0..n_vars {
                flat[draw * n_vars + var] = Self::draw_value(seed, var, draw);
            }
        }
        heap.write_f64s(out.addr(), &flat);
        0
    }
}

impl ForeignModule for FakeStan {
    fn malloc(&self, n_bytes: usize) -> RawPtr {
        let calls = &self.inner.calls;
        if let Some(limit) = self.inner.config.malloc_limit {
            if calls.malloc.get() >= limit {
                return RawPtr::NULL;
            }
        }
        bump(&calls.malloc);
        let mut heap = self.inner.heap.borrow_mut();
        let addr = heap.reserve(n_bytes);
        heap.blocks.insert(addr, vec![0xAA; n_bytes]);
        RawPtr::from_addr(addr)
    }

    unsafe fn free(&self, ptr: RawPtr) {
        bump(&self.inner.calls.free);
        if self.inner.heap.borrow_mut().blocks.remove(&ptr.addr()).is_none() {
            bump(&self.inner.calls.bad_free);
        }
    }

    unsafe fn write_bytes(&self, dst: RawPtr, bytes: &[u8]) {
        let mut heap = self.inner.heap.borrow_mut();
        let block = heap.block_mut(dst.addr());
        assert!(block.len() >= bytes.len(), "write past end of allocation");
        block[..bytes.len()].copy_from_slice(bytes);
    }

    unsafe fn read_f64s(&self, src: F64Ptr, count: usize) -> Vec<f64> {
        let heap = self.inner.heap.borrow();
        let block = heap.block(src.addr());
        assert!(block.len() >= count * 8, "read past end of allocation");
        block[..count * 8]
            .chunks_exact(8)
            .map(|bytes| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                f64::from_le_bytes(raw)
            })
            .collect()
    }

    unsafe fn read_i32(&self, src: RawPtr) -> i32 {
        let heap = self.inner.heap.borrow();
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&heap.block(src.addr())[..4]);
        i32::from_le_bytes(raw)
    }

    unsafe fn read_error_slot(&self, slot: ErrorSlot) -> ErrorPtr {
        let heap = self.inner.heap.borrow();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&heap.block(slot.ptr().addr())[..8]);
        ErrorPtr::from_addr(u64::from_le_bytes(raw) as usize)
    }

    unsafe fn read_cstr(&self, s: CStrPtr) -> Vec<u8> {
        self.inner.heap.borrow().cstr(s.addr())
    }

    unsafe fn create_model(&self, data: CStrPtr, _seed: u32, err: ErrorSlot) -> ModelPtr {
        bump(&self.inner.calls.create_model);
        let mut heap = self.inner.heap.borrow_mut();
        // the data string must be readable at this point
        let _ = heap.cstr(data.addr());

        if let Some(message) = &self.inner.config.fail_create {
            let token = heap.new_error(self.inner.config.error_type, message);
            heap.write_usize(err.ptr().addr(), token);
            return ModelPtr::NULL;
        }

        let names = heap.own_cstr(&self.inner.config.param_names);
        let model = heap.reserve(8);
        heap.models.insert(model, names);
        ModelPtr::from_addr(model)
    }

    unsafe fn destroy_model(&self, model: ModelPtr) {
        bump(&self.inner.calls.destroy_model);
        let mut heap = self.inner.heap.borrow_mut();
        let names = heap
            .models
            .remove(&model.addr())
            .unwrap_or_else(|| panic!("destroying unknown model {:?}", model));
        heap.owned.remove(&names);
    }

    unsafe fn model_param_names(&self, model: ModelPtr) -> CStrPtr {
        let heap = self.inner.heap.borrow();
        let names = heap.models[&model.addr()];
        CStrPtr::from_addr(names)
    }

    unsafe fn model_num_free_params(&self, model: ModelPtr) -> usize {
        assert!(self.inner.heap.borrow().models.contains_key(&model.addr()));
        self.inner.config.free_params
    }

    fn separator_char(&self) -> u8 {
        FAKE_SEPARATOR
    }

    unsafe fn sample(&self, args: &SampleArgs) -> i32 {
        bump(&self.inner.calls.sample);
        self.record_inits(args.inits);
        self.inner.last_metric_len.set(args.metric_out.len());

        let warmup = if args.save_warmup { args.num_warmup } else { 0 };
        let n_draws = args.num_chains * (args.num_samples + warmup) as usize;
        let n_vars = 7 + self.n_model_names();
        assert_eq!(args.out.len(), n_vars * n_draws, "sample output sized wrongly");

        let status = self.run(args.err, args.out.ptr(), args.seed, n_vars, n_draws);
        if status == 0 && !args.metric_out.is_empty() {
            let n = self.inner.config.free_params;
            let per_chain = args.metric_out.len() / args.num_chains;
            let mut flat = Vec::with_capacity(args.metric_out.len());
            for chain in 0..args.num_chains {
                for k in 0..per_chain {
                    let on_diagonal = per_chain == n || k % (n + 1) == 0;
                    flat.push(if on_diagonal { (chain + 1) as f64 } else { 0.0 });
                }
            }
            self.inner
                .heap
                .borrow_mut()
                .write_f64s(args.metric_out.ptr().addr(), &flat);
        }
        status
    }

    unsafe fn pathfinder(&self, args: &PathfinderArgs) -> i32 {
        bump(&self.inner.calls.pathfinder);
        self.record_inits(args.inits);

        let n_draws = if args.psis_resample && args.calculate_lp {
            args.num_multi_draws as usize
        } else {
            args.num_paths * args.num_draws as usize
        };
        let n_vars = 2 + self.n_model_names();
        assert_eq!(args.out.len(), n_vars * n_draws, "pathfinder output sized wrongly");

        self.run(args.err, args.out.ptr(), args.seed, n_vars, n_draws)
    }

    unsafe fn get_error_message(&self, err: ErrorPtr) -> CStrPtr {
        let heap = self.inner.heap.borrow();
        CStrPtr::from_addr(heap.errors[&err.addr()].1)
    }

    unsafe fn get_error_type(&self, err: ErrorPtr) -> i32 {
        self.inner.heap.borrow().errors[&err.addr()].0
    }

    unsafe fn destroy_error(&self, err: ErrorPtr) {
        bump(&self.inner.calls.destroy_error);
        let mut heap = self.inner.heap.borrow_mut();
        if let Some((_, message)) = heap.errors.remove(&err.addr()) {
            heap.owned.remove(&message);
        }
    }

    unsafe fn api_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr) {
        let (a, b, c) = self.inner.config.api_version;
        for (cell, value) in [(major, a), (minor, b), (patch, c)] {
            self.write_bytes(cell, &value.to_le_bytes());
        }
    }

    unsafe fn stan_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr) {
        let (a, b, c) = self.inner.config.stan_version;
        for (cell, value) in [(major, a), (minor, b), (patch, c)] {
            self.write_bytes(cell, &value.to_le_bytes());
        }
    }

    fn set_print_hook(&self, hook: Option<PrintHook>) {
        *self.inner.hook.borrow_mut() = hook;
    }
}
