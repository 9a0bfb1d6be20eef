use std::sync::Arc;

use fxhash::FxHashMap;

use crate::ast::FnDef;
use crate::wirb::{IoHandle, Kind, NativeFn, SmartString, Value, WirbFnNative};

pub type Scope = FxHashMap<SmartString, Value>;

#[derive(Clone, Debug)]
pub enum Callable {
    Native(Arc<WirbFnNative>),
    User(Arc<FnDef>),
}

pub trait Env {
    /// Opens a fresh local scope for a method body.
    fn push(&mut self);
    fn pop(&mut self);
    /// Number of open method scopes.
    fn depth(&self) -> usize;
    fn get(&self, name: &str) -> Option<Value>;
    fn set(&mut self, name: &str, val: Value);
    fn get_global(&self, name: &str) -> Option<Value>;
    fn set_global(&mut self, name: &str, val: Value);
    fn get_fn(&self, name: &str) -> Option<Callable>;
    fn def_fn(&mut self, def: Arc<FnDef>);
    fn reg_fn(&mut self, name: &str, f: NativeFn);
    fn reg_method(&mut self, kind: Kind, name: &str, f: NativeFn);
    fn get_method(&self, kind: Kind, name: &str) -> Option<Arc<WirbFnNative>>;
}

pub struct SandboxEnv {
    frames: Vec<Scope>,
    globals: Scope,
    functions: FxHashMap<SmartString, Callable>,
    methods: FxHashMap<(Kind, SmartString), Arc<WirbFnNative>>,
}

impl Default for SandboxEnv {
    fn default() -> Self {
        let mut this = SandboxEnv {
            frames: vec![Scope::default()],
            globals: Scope::default(),
            functions: FxHashMap::default(),
            methods: FxHashMap::default(),
        };

        this.set_global("stdout", Value::Io(IoHandle::Stdout));

        this
    }
}

impl SandboxEnv {
    fn frame(&self) -> &Scope {
        // `pop` never removes the top-level frame.
        &self.frames[self.frames.len() - 1]
    }
}

impl Env for SandboxEnv {
    #[inline(always)]
    fn push(&mut self) {
        self.frames.push(Scope::default());
    }

    #[inline(always)]
    fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    #[inline(always)]
    fn get(&self, name: &str) -> Option<Value> {
        self.frame().get(name).cloned()
    }

    #[inline(always)]
    fn set(&mut self, name: &str, val: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(SmartString::from(name), val);
        }
    }

    fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    fn set_global(&mut self, name: &str, val: Value) {
        self.globals.insert(SmartString::from(name), val);
    }

    fn get_fn(&self, name: &str) -> Option<Callable> {
        self.functions.get(name).cloned()
    }

    fn def_fn(&mut self, def: Arc<FnDef>) {
        self.functions
            .insert(SmartString::from(def.name.as_str()), Callable::User(def));
    }

    fn reg_fn(&mut self, name: &str, f: NativeFn) {
        self.functions
            .insert(SmartString::from(name), Callable::Native(WirbFnNative::new(name, f)));
    }

    fn reg_method(&mut self, kind: Kind, name: &str, f: NativeFn) {
        self.methods
            .insert((kind, SmartString::from(name)), WirbFnNative::new(name, f));
    }

    fn get_method(&self, kind: Kind, name: &str) -> Option<Arc<WirbFnNative>> {
        self.methods.get(&(kind, SmartString::from(name))).cloned()
    }
}
