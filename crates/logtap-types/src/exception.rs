use std::collections::HashMap;
use std::sync::Arc;

/// Handle to an exception type known to a [`TypeCatalog`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    pub name: Arc<str>,
    pub supertype: Option<Arc<str>>,
}

/// Catalog of exception type names that descriptors can be resolved against
///
/// Lookups are plain map reads; misses are not remembered.
#[derive(Clone, Debug, Default)]
pub struct TypeCatalog {
    types: HashMap<Arc<str>, TypeHandle>,
}

impl TypeCatalog {
    /// Empty catalog; nothing resolves
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the common JDK throwable hierarchy
    pub fn jdk() -> Self {
        let mut catalog = Self::new();
        for (name, supertype) in [
            ("java.lang.Throwable", None),
            ("java.lang.Exception", Some("java.lang.Throwable")),
            ("java.lang.Error", Some("java.lang.Throwable")),
            ("java.lang.RuntimeException", Some("java.lang.Exception")),
            ("java.lang.IllegalArgumentException", Some("java.lang.RuntimeException")),
            ("java.lang.IllegalStateException", Some("java.lang.RuntimeException")),
            ("java.lang.NullPointerException", Some("java.lang.RuntimeException")),
            ("java.lang.UnsupportedOperationException", Some("java.lang.RuntimeException")),
            ("java.lang.ClassCastException", Some("java.lang.RuntimeException")),
            ("java.lang.IndexOutOfBoundsException", Some("java.lang.RuntimeException")),
            ("java.lang.ArithmeticException", Some("java.lang.RuntimeException")),
            ("java.lang.NumberFormatException", Some("java.lang.IllegalArgumentException")),
            ("java.lang.ClassNotFoundException", Some("java.lang.ReflectiveOperationException")),
            ("java.lang.ReflectiveOperationException", Some("java.lang.Exception")),
            ("java.lang.InterruptedException", Some("java.lang.Exception")),
            ("java.lang.OutOfMemoryError", Some("java.lang.VirtualMachineError")),
            ("java.lang.StackOverflowError", Some("java.lang.VirtualMachineError")),
            ("java.lang.VirtualMachineError", Some("java.lang.Error")),
            ("java.lang.NoClassDefFoundError", Some("java.lang.LinkageError")),
            ("java.lang.LinkageError", Some("java.lang.Error")),
            ("java.io.IOException", Some("java.lang.Exception")),
            ("java.io.FileNotFoundException", Some("java.io.IOException")),
            ("java.io.UncheckedIOException", Some("java.lang.RuntimeException")),
            ("java.util.NoSuchElementException", Some("java.lang.RuntimeException")),
            ("java.util.ConcurrentModificationException", Some("java.lang.RuntimeException")),
            ("java.util.concurrent.ExecutionException", Some("java.lang.Exception")),
            ("java.util.concurrent.TimeoutException", Some("java.lang.Exception")),
            ("java.sql.SQLException", Some("java.lang.Exception")),
        ] {
            catalog.register(name, supertype);
        }
        catalog
    }

    /// Add or replace a type
    pub fn register(&mut self, name: &str, supertype: Option<&str>) {
        let handle = TypeHandle {
            name: Arc::from(name),
            supertype: supertype.map(Arc::from),
        };
        self.types.insert(Arc::clone(&handle.name), handle);
    }

    /// Look up a fully-qualified type name
    pub fn resolve(&self, name: &str) -> Option<TypeHandle> {
        self.types.get(name).cloned()
    }

    /// Whether `name` is `ancestor` or (transitively) one of its subtypes
    pub fn is_assignable(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        // Bounded by the catalog size in case of a registered cycle
        for _ in 0..=self.types.len() {
            match current {
                Some(n) if n == ancestor => return true,
                Some(n) => current = self.types.get(n).and_then(|h| h.supertype.as_deref()),
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Parsed exception and its chain of causes, outermost first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionDescriptor {
    pub type_name: String,
    pub message: Option<String>,
    pub resolved: Option<TypeHandle>,
    pub cause: Option<Box<ExceptionDescriptor>>,
}

impl ExceptionDescriptor {
    pub fn new(type_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message,
            resolved: None,
            cause: None,
        }
    }

    pub fn cause(&self) -> Option<&ExceptionDescriptor> {
        self.cause.as_deref()
    }

    /// Iterate this descriptor and every nested cause
    pub fn chain(&self) -> impl Iterator<Item = &ExceptionDescriptor> {
        std::iter::successors(Some(self), |d| d.cause())
    }

    /// Innermost cause (or self when there is none)
    pub fn root_cause(&self) -> &ExceptionDescriptor {
        self.chain().last().unwrap_or(self)
    }

    /// Simple (unqualified) type name
    pub fn simple_name(&self) -> &str {
        self.type_name.rsplit('.').next().unwrap_or(&self.type_name)
    }
}
