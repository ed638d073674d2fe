//! Test harness for end-to-end compilation and execution
//!
//! Modules are assembled with [`ModuleBuilder`], compiled to encoded units and
//! loaded into a fresh reference VM.

use kiln_compiler::{CompileError, CompileOptions, CompiledUnit, Compiler};
use kiln_core::{Value, Vm, VmError};
use kiln_ir::{BuildError, Module, ModuleBuilder};

/// Error type for e2e tests
#[derive(Debug)]
pub enum E2EError {
    /// IR assembly error
    Build(BuildError),
    /// Compilation error
    Compile(CompileError),
    /// VM execution error
    Vm(VmError),
}

impl std::fmt::Display for E2EError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            E2EError::Build(e) => write!(f, "Build error: {}", e),
            E2EError::Compile(e) => write!(f, "Compile error: {}", e),
            E2EError::Vm(e) => write!(f, "VM error: {}", e),
        }
    }
}

impl std::error::Error for E2EError {}

/// Result type for e2e tests
pub type E2EResult<T> = Result<T, E2EError>;

/// Assemble a module named `name`
pub fn module(name: &str, build: impl FnOnce(&mut ModuleBuilder)) -> Module {
    try_module(name, build).unwrap_or_else(|e| panic!("{}", e))
}

pub fn try_module(name: &str, build: impl FnOnce(&mut ModuleBuilder)) -> E2EResult<Module> {
    let mut builder = ModuleBuilder::new(name);
    build(&mut builder);
    builder.build().map_err(E2EError::Build)
}

/// Compile a module with the default options
pub fn compile(module: &Module) -> E2EResult<Vec<CompiledUnit>> {
    compile_with(module, CompileOptions::default())
}

pub fn compile_with(module: &Module, options: CompileOptions) -> E2EResult<Vec<CompiledUnit>> {
    Compiler::new(options)
        .compile(module)
        .map_err(E2EError::Compile)
}

/// Compile every module and load all their units into one VM
pub fn load(modules: &[&Module]) -> E2EResult<Vm> {
    let mut vm = Vm::new();
    for module in modules {
        let units = compile(module)?;
        vm.load_all(units.iter().map(|u| u.bytecode.as_slice()))
            .map_err(E2EError::Vm)?;
    }
    Ok(vm)
}

/// Compile `module` and call its function `function`
pub fn compile_and_run(module: &Module, function: &str, args: Vec<Value>) -> E2EResult<Value> {
    let mut vm = load(&[module])?;
    vm.call(&module.name, function, args).map_err(E2EError::Vm)
}

/// Compile `module`, run its entry point and return what it printed
pub fn compile_and_print(module: &Module) -> E2EResult<String> {
    let mut vm = load(&[module])?;
    vm.run_main(&module.name, &[]).map_err(E2EError::Vm)?;
    Ok(vm.take_output())
}

/// Compile and call, expecting a specific result
pub fn expect_value(module: &Module, function: &str, args: Vec<Value>, expected: Value) {
    match compile_and_run(module, function, args) {
        Ok(value) => assert_eq!(value, expected, "Wrong result of {}.{}", module.name, function),
        Err(e) => panic!("Compilation/execution of {} failed: {}", module.name, e),
    }
}

/// Compile and call, expecting a specific i32 result
pub fn expect_i32(module: &Module, function: &str, args: Vec<Value>, expected: i32) {
    expect_value(module, function, args, Value::I32(expected));
}

/// Compile and call, expecting a specific boolean result
pub fn expect_bool(module: &Module, function: &str, args: Vec<Value>, expected: bool) {
    expect_value(module, function, args, Value::Bool(expected));
}

/// Compile and call, expecting a result that prints as `expected`
pub fn expect_display(module: &Module, function: &str, args: Vec<Value>, expected: &str) {
    match compile_and_run(module, function, args) {
        Ok(value) => assert_eq!(value.to_string(), expected, "Wrong result of {}.{}", module.name, function),
        Err(e) => panic!("Compilation/execution of {} failed: {}", module.name, e),
    }
}

/// Compile and run main, expecting a specific output
pub fn expect_output(module: &Module, expected: &str) {
    match compile_and_print(module) {
        Ok(output) => assert_eq!(output, expected, "Wrong output of {}", module.name),
        Err(e) => panic!("Compilation/execution of {} failed: {}", module.name, e),
    }
}

/// Compile and call, expecting an uncaught exception; returns the thrown value
pub fn expect_thrown(module: &Module, function: &str, args: Vec<Value>) -> Value {
    match compile_and_run(module, function, args) {
        Err(E2EError::Vm(VmError::Thrown(value))) => value,
        Err(e) => panic!("Expected a thrown value from {}, got error: {}", function, e),
        Ok(value) => panic!("Expected a thrown value from {}, got {:?}", function, value),
    }
}

/// Expect compilation to stop at resolution, returning the problem codes
pub fn expect_compile_problems(module: &Module) -> Vec<&'static str> {
    match compile(module) {
        Err(E2EError::Compile(e)) => match e.failure() {
            Some(failure) => failure.problems().iter().map(|p| p.kind.code()).collect(),
            None => panic!("Expected resolution problems, got: {}", e),
        },
        Err(e) => panic!("Expected resolution problems, got: {}", e),
        Ok(_) => panic!("Expected {} to fail compilation", module.name),
    }
}
