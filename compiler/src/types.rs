use serde::Serialize;

pub const SCALAR_TYPES: [&str; 15] = [
    "double", "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64",
    "fixed32", "fixed64", "sfixed32", "sfixed64", "bool", "string", "bytes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line:   usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionValue {
    pub name:  String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
    Singular = 0,
    Optional = 1,
    Repeated = 2,
}

/// A field type. The parser only produces `Scalar` and `Unresolved`; the
/// verifier replaces every `Unresolved` with a fully-qualified `Message` or
/// `Enum` reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldType {
    /// Index into [`SCALAR_TYPES`].
    Scalar(u8),
    Message(String),
    Enum(String),
    Unresolved(String),
}

impl FieldType {
    pub fn scalar(name: &str) -> Option<FieldType> {
        SCALAR_TYPES
            .iter()
            .position(|&t| t == name)
            .map(|idx| FieldType::Scalar(idx as u8))
    }

    pub fn scalar_name(&self) -> Option<&'static str> {
        match self {
            FieldType::Scalar(idx) => SCALAR_TYPES.get(*idx as usize).copied(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name:       String,
    pub number:     i32,
    pub label:      Label,
    pub type_:      FieldType,
    pub deprecated: bool,
    pub location:   Location,
    pub options:    Vec<OptionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub name:     String,
    pub location: Location,
    pub fields:   Vec<Field>,
    pub options:  Vec<OptionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumValue {
    pub name:     String,
    pub number:   i32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enum {
    pub name:     String,
    pub location: Location,
    pub values:   Vec<EnumValue>,
    pub options:  Vec<OptionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Method {
    pub name:             String,
    pub location:         Location,
    pub input_type:       String,
    pub output_type:      String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options:          Vec<OptionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub name:     String,
    pub location: Location,
    pub methods:  Vec<Method>,
    pub options:  Vec<OptionValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescriptor {
    /// Import path of the file relative to its include root, `/`-separated.
    pub name:         String,
    pub package:      Option<String>,
    pub syntax:       Option<String>,
    pub dependencies: Vec<String>,
    pub options:      Vec<OptionValue>,
    pub messages:     Vec<Message>,
    pub enums:        Vec<Enum>,
    pub services:     Vec<Service>,
}

impl FileDescriptor {
    pub fn new(name: &str) -> Self {
        FileDescriptor {
            name:         name.to_string(),
            package:      None,
            syntax:       None,
            dependencies: Vec::new(),
            options:      Vec::new(),
            messages:     Vec::new(),
            enums:        Vec::new(),
            services:     Vec::new(),
        }
    }

    /// Fully-qualified name of a top-level definition in this file.
    pub fn qualify(&self, name: &str) -> String {
        match &self.package {
            Some(pkg) => format!("{}.{}", pkg, name),
            None => name.to_string(),
        }
    }

    /// File name without the `.proto` extension, e.g. `google/api/http`.
    pub fn stem(&self) -> &str {
        self.name.strip_suffix(".proto").unwrap_or(&self.name)
    }
}

/// A fully-resolved schema graph: every file reachable from the compiled
/// inputs, dependencies before dependents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorSet {
    pub files: Vec<FileDescriptor>,
}

/// What a fully-qualified type name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Message,
    Enum,
    Service,
}

impl DescriptorSet {
    pub fn file(&self, name: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Locate a top-level definition by fully-qualified name. Returns the
    /// defining file and the definition's local name.
    pub fn find_definition(&self, full_name: &str) -> Option<(&FileDescriptor, &str, DefinitionKind)> {
        for file in &self.files {
            let local = match &file.package {
                Some(pkg) => match full_name.strip_prefix(pkg.as_str()).and_then(|s| s.strip_prefix('.')) {
                    Some(local) => local,
                    None => continue,
                },
                None => full_name,
            };
            if let Some(m) = file.messages.iter().find(|m| m.name == local) {
                return Some((file, m.name.as_str(), DefinitionKind::Message));
            }
            if let Some(e) = file.enums.iter().find(|e| e.name == local) {
                return Some((file, e.name.as_str(), DefinitionKind::Enum));
            }
            if let Some(s) = file.services.iter().find(|s| s.name == local) {
                return Some((file, s.name.as_str(), DefinitionKind::Service));
            }
        }
        None
    }
}
