use std::collections::{HashMap, HashSet};
use crate::{
    types::{DefinitionKind, DescriptorSet, FieldType, FileDescriptor},
    parser::MAX_FIELD_NUMBER,
    utils::quote,
    error::CompileError,
};

/// Field numbers reserved for the protobuf implementation.
pub const RESERVED_FIELD_NUMBERS: std::ops::RangeInclusive<i32> = 19000..=19999;

fn verifier_error(file: &FileDescriptor, msg: String) -> CompileError {
    CompileError::VerifierError {
        file: file.name.clone(),
        msg,
    }
}

/// Checks the whole set and resolves every type reference to its
/// fully-qualified name. Returns `Err(CompileError::VerifierError(_))` on the
/// first problem found.
pub fn verify_descriptor_set(set: &mut DescriptorSet) -> Result<(), CompileError> {
    // 1) Collect every top-level symbol, rejecting duplicates across files
    let mut symbols: HashMap<String, (DefinitionKind, String)> = HashMap::new();
    for file in &set.files {
        let names = file
            .messages
            .iter()
            .map(|m| (m.name.as_str(), DefinitionKind::Message))
            .chain(file.enums.iter().map(|e| (e.name.as_str(), DefinitionKind::Enum)))
            .chain(file.services.iter().map(|s| (s.name.as_str(), DefinitionKind::Service)));

        for (name, kind) in names {
            let full_name = file.qualify(name);
            if let Some((_, other)) = symbols.get(&full_name) {
                return Err(verifier_error(
                    file,
                    format!("The type {} is already defined in {}", quote(&full_name), quote(other)),
                ));
            }
            symbols.insert(full_name, (kind, file.name.clone()));
        }
    }

    let index: HashMap<String, usize> = set
        .files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i))
        .collect();

    for i in 0..set.files.len() {
        let visible: HashSet<String> = {
            let file = &set.files[i];
            std::iter::once(file.name.clone())
                .chain(file.dependencies.iter().cloned())
                .filter(|name| index.contains_key(name))
                .collect()
        };
        verify_file(&mut set.files[i], &symbols, &visible)?;
    }

    Ok(())
}

fn verify_file(
    file: &mut FileDescriptor,
    symbols: &HashMap<String, (DefinitionKind, String)>,
    visible: &HashSet<String>,
) -> Result<(), CompileError> {
    let package = file.package.clone();
    let lookup = |name: &str| resolve_name(package.as_deref(), name, symbols);

    // 2) Enums: non-empty, zero first value (proto3), unique value names
    for e in &file.enums {
        let first = match e.values.first() {
            Some(first) => first,
            None => {
                return Err(verifier_error(file, format!("The enum {} has no values", quote(&e.name))));
            }
        };
        if first.number != 0 && file.syntax.as_deref() != Some("proto2") {
            return Err(verifier_error(
                file,
                format!("The first value of enum {} must be zero", quote(&e.name)),
            ));
        }
        let mut seen = HashSet::new();
        for value in &e.values {
            if !seen.insert(value.name.as_str()) {
                return Err(verifier_error(
                    file,
                    format!("The enum value {} is defined twice in {}", quote(&value.name), quote(&e.name)),
                ));
            }
        }
    }

    // 3) Messages: field names and numbers, then type resolution
    let mut resolved_fields = Vec::new();
    for (mi, message) in file.messages.iter().enumerate() {
        let mut names = HashSet::new();
        let mut numbers = HashSet::new();
        for (fi, field) in message.fields.iter().enumerate() {
            if !names.insert(field.name.as_str()) {
                return Err(verifier_error(
                    file,
                    format!("The field {} is defined twice in {}", quote(&field.name), quote(&message.name)),
                ));
            }
            if field.number <= 0 || field.number > MAX_FIELD_NUMBER {
                return Err(verifier_error(
                    file,
                    format!("The number of field {} is out of range", quote(&field.name)),
                ));
            }
            if RESERVED_FIELD_NUMBERS.contains(&field.number) {
                return Err(verifier_error(
                    file,
                    format!("The number of field {} falls in the reserved range 19000-19999", quote(&field.name)),
                ));
            }
            if !numbers.insert(field.number) {
                return Err(verifier_error(
                    file,
                    format!("The number {} is used twice in {}", field.number, quote(&message.name)),
                ));
            }

            if let FieldType::Unresolved(type_name) = &field.type_ {
                let (full_name, kind) = check_reference(file, visible, type_name, lookup(type_name))?;
                let resolved = match kind {
                    DefinitionKind::Message => FieldType::Message(full_name),
                    DefinitionKind::Enum => FieldType::Enum(full_name),
                    DefinitionKind::Service => {
                        return Err(verifier_error(
                            file,
                            format!("The field {} cannot have service type {}", quote(&field.name), quote(type_name)),
                        ));
                    }
                };
                resolved_fields.push((mi, fi, resolved));
            }
        }
    }

    // 4) Services: unique method names, message-typed input and output
    let mut resolved_methods = Vec::new();
    for (si, service) in file.services.iter().enumerate() {
        let mut names = HashSet::new();
        for (mi, method) in service.methods.iter().enumerate() {
            if !names.insert(method.name.as_str()) {
                return Err(verifier_error(
                    file,
                    format!("The method {} is defined twice in {}", quote(&method.name), quote(&service.name)),
                ));
            }
            let resolve_message = |type_name: &str| -> Result<String, CompileError> {
                let (full_name, kind) = check_reference(file, visible, type_name, lookup(type_name))?;
                if kind != DefinitionKind::Message {
                    return Err(verifier_error(
                        file,
                        format!("The method {} must use message types, found {}", quote(&method.name), quote(type_name)),
                    ));
                }
                Ok(full_name)
            };
            let input = resolve_message(&method.input_type)?;
            let output = resolve_message(&method.output_type)?;
            resolved_methods.push((si, mi, input, output));
        }
    }

    for (mi, fi, resolved) in resolved_fields {
        file.messages[mi].fields[fi].type_ = resolved;
    }
    for (si, mi, input, output) in resolved_methods {
        let method = &mut file.services[si].methods[mi];
        method.input_type = input;
        method.output_type = output;
    }

    Ok(())
}

/// Scope-walking lookup: `T` referenced from package `a.b` is tried as
/// `a.b.T`, `a.T`, then `T`. A leading dot means the name is already
/// fully qualified.
fn resolve_name<'s>(
    package: Option<&str>,
    name: &str,
    symbols: &'s HashMap<String, (DefinitionKind, String)>,
) -> Option<(String, &'s (DefinitionKind, String))> {
    if let Some(absolute) = name.strip_prefix('.') {
        return symbols.get(absolute).map(|entry| (absolute.to_string(), entry));
    }

    let mut scope: Vec<&str> = package.map(|p| p.split('.').collect()).unwrap_or_default();
    loop {
        let candidate = if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", scope.join("."), name)
        };
        if let Some(entry) = symbols.get(&candidate) {
            return Some((candidate, entry));
        }
        if scope.pop().is_none() {
            return None;
        }
    }
}

fn check_reference(
    file: &FileDescriptor,
    visible: &HashSet<String>,
    type_name: &str,
    found: Option<(String, &(DefinitionKind, String))>,
) -> Result<(String, DefinitionKind), CompileError> {
    match found {
        None => Err(verifier_error(file, format!("The type {} is not defined", quote(type_name)))),
        Some((full_name, (_, defined_in))) if !visible.contains(defined_in) => Err(verifier_error(
            file,
            format!(
                "The type {} is defined in {}, which is not imported",
                quote(&full_name),
                quote(defined_in)
            ),
        )),
        Some((full_name, (kind, _))) => Ok((full_name, *kind)),
    }
}
