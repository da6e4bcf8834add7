//! Multi-module compilation driver.
//!
//! A [`Library`] owns one compilation: the shared AST arena, the string
//! interner, and every module from source bytes to linked chunks. The
//! pipeline is:
//!
//! 1. collect sources (a synthetic `builtin` module first, then the user's
//!    files; module names derive from relative paths with separators
//!    turned into dots)
//! 2. parse every module
//! 3. dependency scan (exports) of every module
//! 4. per module: build the import map (builtins unconditionally, then
//!    wildcard or selective imports), typecheck, and pre-fill the
//!    module's callable tables from the analyzer's symbol registry
//! 5. compile every module to chunks
//! 6. link: populate reference-local offsets, resolve native entries to
//!    trampolines and imported function entries to their defining
//!    module's chunks, then mirror both tables into the runtime-resolved
//!    vectors the VM reads
//!
//! Parse and sema failures stop the pipeline after the offending phase
//! with every collected diagnostic; link failures carry module and symbol
//! context.

use roxyc_bc::{disassemble_chunk, FunctionTableEntry, Module, NativeTableEntry, Program};
use roxyc_gen::{CompileError, Compiler};
use roxyc_lex::LineMap;
use roxyc_par::{Ast, ImportSymbols, ModuleStmt, Parser, Stmt, StmtId};
use roxyc_runtime::{lookup_native, StringInterner};
use roxyc_sem::{scan_exports, ImportMap, ModuleSymbols, SemaAnalyzer};
use roxyc_util::{Handler, Idx, ModuleId, SourceLocation};
use roxyc_vm::{RuntimeError, Vm};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Declarations of the natives injected into every module.
const BUILTIN_SOURCE: &str = "\
pub native fun print_i32(value: i32);
pub native fun print_i64(value: i64);
pub native fun print_u32(value: u32);
pub native fun print_u64(value: u64);
pub native fun print_f32(value: f32);
pub native fun print_f64(value: f64);
pub native fun print(value: string);
pub native fun concat(a: string, b: string): string;
pub native fun clock(): f64;
";

pub const BUILTIN_MODULE: &str = "builtin";

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Cannot find module {0}.")]
    MissingModule(String),
    #[error("In module {module}: cannot find symbol {name}.")]
    MissingSymbol { module: String, name: String },
    #[error("In module {module}: unresolved native function {name}.")]
    MissingNative { module: String, name: String },
    #[error("Duplicate module name {0}.")]
    DuplicateModule(String),
    #[error("Internal link error: {0}.")]
    Internal(&'static str),
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Error while opening file {path}!")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Parse or typecheck failures; the rendered diagnostics are attached.
    #[error("Compilation failed with {} error(s).", diagnostics.len())]
    CompileFailed { diagnostics: Vec<String> },
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// One module's compile-time state next to its `roxyc_bc::Module`.
struct Unit {
    root: StmtId,
    line_map: LineMap,
    symbols: ModuleSymbols,
}

pub struct Library {
    ast: Ast,
    interner: StringInterner,
    program: Program,
    units: Vec<Unit>,
    module_index: FxHashMap<String, usize>,
}

impl Library {
    /// Compiles every `.roxy` file under a directory tree.
    pub fn compile_from_dir(directory: &Path) -> Result<Library, LibraryError> {
        let mut files = Vec::new();
        collect_roxy_files(directory, &mut files)?;
        files.sort();
        Self::compile_from_files(directory, &files)
    }

    /// Compiles an explicit set of files; module names derive from the
    /// paths relative to `root`.
    pub fn compile_from_files(root: &Path, files: &[PathBuf]) -> Result<Library, LibraryError> {
        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            let bytes = std::fs::read(path)
                .map_err(|source| LibraryError::Io { path: path.clone(), source })?;
            sources.push((module_name_for(root, path), bytes));
        }
        Self::compile_sources(sources)
    }

    /// Compiles named in-memory sources. The `builtin` module is always
    /// prepended.
    pub fn compile_sources(sources: Vec<(String, Vec<u8>)>) -> Result<Library, LibraryError> {
        let mut names: Vec<String> = Vec::with_capacity(sources.len() + 1);
        let mut buffers: Vec<Vec<u8>> = Vec::with_capacity(sources.len() + 1);
        names.push(BUILTIN_MODULE.to_string());
        buffers.push(BUILTIN_SOURCE.as_bytes().to_vec());
        for (name, bytes) in sources {
            names.push(name);
            buffers.push(bytes);
        }

        let mut module_index = FxHashMap::default();
        for (index, name) in names.iter().enumerate() {
            if module_index.insert(name.clone(), index).is_some() {
                return Err(LinkError::DuplicateModule(name.clone()).into());
            }
        }

        let mut ast = Ast::new();
        let handler = Handler::new();

        // Parse everything; a parse failure anywhere stops the pipeline,
        // but every module still gets scanned for its own diagnostics.
        let mut roots: Vec<StmtId> = Vec::with_capacity(names.len());
        let mut line_maps: Vec<LineMap> = Vec::with_capacity(names.len());
        for (index, buffer) in buffers.iter().enumerate() {
            let parsed =
                Parser::new(buffer, ModuleId::from_usize(index), &mut ast, &handler).parse_module();
            roots.push(parsed.root);
            line_maps.push(parsed.line_map);
        }
        if handler.has_errors() {
            let diagnostics = handler.take().into_iter().map(|d| d.message).collect();
            return Err(LibraryError::CompileFailed { diagnostics });
        }

        // Dependency scan before any body is checked.
        for &root in &roots {
            scan_exports(&mut ast, root);
        }

        // Typecheck each module under its import map.
        let mut units: Vec<Unit> = Vec::with_capacity(names.len());
        for index in 0..names.len() {
            let import_map = build_import_map(
                &ast,
                &names,
                &buffers,
                &roots,
                &module_index,
                index,
            )?;
            let analysis =
                SemaAnalyzer::new(&mut ast, &buffers[index]).typecheck(roots[index], &import_map);
            if !analysis.errors.is_empty() {
                let diagnostics = analysis
                    .errors
                    .iter()
                    .map(|error| {
                        render_error(&buffers[index], &line_maps[index], error.loc, &error.kind)
                    })
                    .collect();
                return Err(LibraryError::CompileFailed { diagnostics });
            }
            units.push(Unit {
                root: roots[index],
                line_map: line_maps[index].clone(),
                symbols: analysis.symbols,
            });
        }

        // Materialize the bytecode modules with their callable tables.
        let mut modules: Vec<Module> = Vec::with_capacity(names.len());
        for (index, unit) in units.iter().enumerate() {
            let mut module =
                Module::new(ModuleId::from_usize(index), names[index].clone(), buffers[index].clone());
            for &decl in &unit.symbols.functions {
                let fun = &ast.fun_decls[decl];
                let defining = fun.module.index();
                module.functions.push(FunctionTableEntry {
                    name: fun.name.text(&buffers[defining]).into_owned(),
                    module_name: names[defining].clone(),
                    chunk: None,
                });
            }
            for &decl in &unit.symbols.natives {
                let fun = &ast.fun_decls[decl];
                let defining = fun.module.index();
                module.natives.push(NativeTableEntry {
                    name: fun.name.text(&buffers[defining]).into_owned(),
                    module_name: names[defining].clone(),
                    fun: None,
                });
            }
            modules.push(module);
        }

        // Compile every module.
        let mut interner = StringInterner::new();
        for (index, unit) in units.iter().enumerate() {
            Compiler::new(
                &ast,
                &buffers[index],
                &unit.line_map,
                &unit.symbols,
                &mut interner,
                &mut modules[index],
            )
            .compile(unit.root)?;
        }

        link(&mut modules, &module_index)?;

        Ok(Library {
            ast,
            interner,
            program: Program { modules },
            units,
            module_index,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.module_index.get(name).map(|&index| ModuleId::from_usize(index))
    }

    /// Runs a module's top level on a fresh VM.
    pub fn run(&self, module_name: &str) -> Result<(), RunError> {
        let id = self
            .find_module(module_name)
            .ok_or_else(|| RunError::UnknownModule(module_name.to_string()))?;
        let mut vm = Vm::new();
        vm.run_module(&self.program, id)?;
        Ok(())
    }

    /// Disassembly of a module's top level and every function it defines.
    pub fn disassembly(&self, module_name: &str) -> Option<String> {
        let id = self.find_module(module_name)?;
        let module = self.program.module(id);
        let mut out = String::new();
        if let Some(chunk) = &module.chunk {
            out.push_str(&disassemble_chunk(chunk));
        }
        for entry in &module.functions {
            if entry.module_name != module.name {
                continue;
            }
            if let Some(chunk) = &entry.chunk {
                out.push('\n');
                out.push_str(&disassemble_chunk(chunk));
            }
        }
        Some(out)
    }

    /// The shared AST, exposed for tooling and tests.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// The root statement of a module, if it exists.
    pub fn module_root(&self, name: &str) -> Option<StmtId> {
        let index = *self.module_index.get(name)?;
        Some(self.units[index].root)
    }

    /// Number of distinct strings interned during compilation.
    pub fn interned_strings(&self) -> usize {
        self.interner.len()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Cannot find module {0}!")]
    UnknownModule(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Derives a module name from a path relative to the compilation root:
/// separators become dots, the extension is dropped.
pub fn module_name_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parts.push(stem);
    parts.retain(|part| !part.is_empty() && part != ".");
    parts.join(".")
}

fn collect_roxy_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), LibraryError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| LibraryError::Io { path: dir.to_path_buf(), source })?;
    for entry in entries {
        let entry =
            entry.map_err(|source| LibraryError::Io { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        if path.is_dir() {
            collect_roxy_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "roxy") {
            files.push(path);
        }
    }
    Ok(())
}

/// The exports of a module's root statement.
fn exports_of(ast: &Ast, root: StmtId) -> &ModuleStmt {
    match &ast.stmts[root] {
        Stmt::Module(m) => m,
        _ => unreachable!("module roots are always module statements"),
    }
}

/// Builds the import map of one module: builtin exports unconditionally,
/// then each import statement resolved relative to the importing module's
/// parent package.
fn build_import_map(
    ast: &Ast,
    names: &[String],
    buffers: &[Vec<u8>],
    roots: &[StmtId],
    module_index: &FxHashMap<String, usize>,
    index: usize,
) -> Result<ImportMap, LinkError> {
    let mut import_map = ImportMap::new();

    if names[index] != BUILTIN_MODULE {
        let builtin = *module_index
            .get(BUILTIN_MODULE)
            .ok_or(LinkError::Internal("builtin module missing"))?;
        for &decl in &exports_of(ast, roots[builtin]).exports {
            let name = ast.fun_decls[decl].name.text(&buffers[builtin]).into_owned();
            import_map.insert(name, decl);
        }
    }

    let parent = names[index].rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
    let imports = exports_of(ast, roots[index]).imports.clone();
    for import_stmt in imports {
        let Stmt::Import(import) = &ast.stmts[import_stmt] else { continue };

        let mut target = String::new();
        if !parent.is_empty() {
            target.push_str(parent);
            target.push('.');
        }
        for (i, segment) in import.path.iter().enumerate() {
            if i > 0 {
                target.push('.');
            }
            target.push_str(&segment.text(&buffers[index]));
        }

        let Some(&target_index) = module_index.get(&target) else {
            return Err(LinkError::MissingModule(target));
        };
        let target_exports = &exports_of(ast, roots[target_index]).exports;

        match &import.symbols {
            ImportSymbols::Wildcard => {
                for &decl in target_exports {
                    let name =
                        ast.fun_decls[decl].name.text(&buffers[target_index]).into_owned();
                    import_map.insert(name, decl);
                }
            }
            ImportSymbols::Selective(symbols) => {
                for symbol in symbols {
                    let wanted = symbol.text(&buffers[index]).into_owned();
                    let found = target_exports.iter().copied().find(|&decl| {
                        ast.fun_decls[decl].name.lexeme(&buffers[target_index])
                            == wanted.as_bytes()
                    });
                    match found {
                        Some(decl) => {
                            import_map.insert(wanted, decl);
                        }
                        None => {
                            return Err(LinkError::MissingSymbol {
                                module: target,
                                name: wanted,
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(import_map)
}

/// Renders a sema error in the user-visible diagnostic format.
fn render_error(
    source: &[u8],
    line_map: &LineMap,
    loc: SourceLocation,
    kind: &roxyc_sem::SemaErrorKind,
) -> String {
    let line = line_map.line_of(loc.offset);
    let lexeme = loc.lexeme(source);
    format!("[line {line}] Error at '{lexeme}': {kind}")
}

/// The link step: resolve cross-module references and finish the chunks.
fn link(modules: &mut [Module], module_index: &FxHashMap<String, usize>) -> Result<(), LinkError> {
    // Reference-local offsets, while each chunk is still unshared.
    for module in modules.iter_mut() {
        if let Some(chunk) = module.chunk.as_mut() {
            Rc::get_mut(chunk)
                .ok_or(LinkError::Internal("module chunk already shared"))?
                .find_ref_local_offsets();
        }
        for entry in module.functions.iter_mut() {
            if let Some(chunk) = entry.chunk.as_mut() {
                Rc::get_mut(chunk)
                    .ok_or(LinkError::Internal("function chunk already shared"))?
                    .find_ref_local_offsets();
            }
        }
    }

    // The builtin module's own natives bind to the runtime trampolines.
    if let Some(&builtin) = module_index.get(BUILTIN_MODULE) {
        let module_name = modules[builtin].name.clone();
        for entry in modules[builtin].natives.iter_mut() {
            if entry.fun.is_none() {
                entry.fun = Some(lookup_native(&entry.name).ok_or_else(|| {
                    LinkError::MissingNative { module: module_name.clone(), name: entry.name.clone() }
                })?);
            }
        }
    }

    // Resolve unresolved function entries from their defining modules.
    for importer in 0..modules.len() {
        for slot in 0..modules[importer].functions.len() {
            if modules[importer].functions[slot].chunk.is_some() {
                continue;
            }
            let defining_name = modules[importer].functions[slot].module_name.clone();
            let symbol = modules[importer].functions[slot].name.clone();
            let &defining = module_index
                .get(&defining_name)
                .ok_or(LinkError::MissingModule(defining_name.clone()))?;
            let found = modules[defining]
                .functions
                .iter()
                .find(|entry| entry.name == symbol && entry.chunk.is_some())
                .and_then(|entry| entry.chunk.clone())
                .ok_or(LinkError::MissingSymbol { module: defining_name, name: symbol })?;
            modules[importer].functions[slot].chunk = Some(found);
        }

        for slot in 0..modules[importer].natives.len() {
            if modules[importer].natives[slot].fun.is_some() {
                continue;
            }
            let defining_name = modules[importer].natives[slot].module_name.clone();
            let symbol = modules[importer].natives[slot].name.clone();
            let &defining = module_index
                .get(&defining_name)
                .ok_or(LinkError::MissingModule(defining_name.clone()))?;
            let found = modules[defining]
                .natives
                .iter()
                .find(|entry| entry.name == symbol)
                .and_then(|entry| entry.fun)
                .ok_or(LinkError::MissingNative { module: defining_name, name: symbol })?;
            modules[importer].natives[slot].fun = Some(found);
        }
    }

    // Mirror the resolved tables into the vectors the VM indexes.
    for module in modules.iter_mut() {
        module.runtime_functions = module
            .functions
            .iter()
            .map(|entry| {
                entry
                    .chunk
                    .clone()
                    .ok_or(LinkError::Internal("function entry left unresolved"))
            })
            .collect::<Result<_, _>>()?;
        module.runtime_natives = module
            .natives
            .iter()
            .map(|entry| entry.fun.ok_or(LinkError::Internal("native entry left unresolved")))
            .collect::<Result<_, _>>()?;
    }

    Ok(())
}
