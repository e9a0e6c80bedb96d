use protoplex_wire::{ByteBuffer, ByteBufferMut, WireError};
use crate::{
    types::{
        DescriptorSet, Enum, EnumValue, Field, FieldType, FileDescriptor, Label, Location, Message,
        Method, OptionValue, Service, SCALAR_TYPES,
    },
    error::CompileError,
};

pub const DESCRIPTOR_MAGIC: &[u8; 4] = b"PPXD";
pub const DESCRIPTOR_VERSION: u8 = 1;

const TYPE_SCALAR: u8 = 0;
const TYPE_MESSAGE: u8 = 1;
const TYPE_ENUM: u8 = 2;

const CLIENT_STREAMING: u8 = 1;
const SERVER_STREAMING: u8 = 2;

/// Encode a resolved `DescriptorSet` into bytes. Every file, definition and
/// source location is kept, so consumers never need the schema sources.
/// Returns `Err(CompileError::EncodeError)` if a type reference was never
/// resolved.
pub fn encode_descriptor_set(set: &DescriptorSet) -> Result<Vec<u8>, CompileError> {
    let mut bb = ByteBufferMut::new();
    bb.write_bytes(DESCRIPTOR_MAGIC);
    bb.write_byte(DESCRIPTOR_VERSION);
    bb.write_var_uint(set.files.len() as u32);

    for file in &set.files {
        bb.write_string(&file.name);
        bb.write_string(file.package.as_deref().unwrap_or(""));
        bb.write_string(file.syntax.as_deref().unwrap_or(""));
        bb.write_string_list(&file.dependencies);
        write_options(&mut bb, &file.options);

        bb.write_var_uint(file.messages.len() as u32);
        for message in &file.messages {
            bb.write_string(&message.name);
            write_location(&mut bb, message.location);
            write_options(&mut bb, &message.options);

            bb.write_var_uint(message.fields.len() as u32);
            for field in &message.fields {
                bb.write_string(&field.name);
                bb.write_var_int(field.number);
                bb.write_byte(field.label as u8);
                match &field.type_ {
                    FieldType::Scalar(idx) => {
                        bb.write_byte(TYPE_SCALAR);
                        bb.write_byte(*idx);
                    }
                    FieldType::Message(name) => {
                        bb.write_byte(TYPE_MESSAGE);
                        bb.write_string(name);
                    }
                    FieldType::Enum(name) => {
                        bb.write_byte(TYPE_ENUM);
                        bb.write_string(name);
                    }
                    FieldType::Unresolved(name) => {
                        return Err(CompileError::EncodeError(format!(
                            "Type '{}' of field '{}' in {} was never resolved",
                            name, field.name, file.name
                        )));
                    }
                }
                bb.write_bool(field.deprecated);
                write_location(&mut bb, field.location);
                write_options(&mut bb, &field.options);
            }
        }

        bb.write_var_uint(file.enums.len() as u32);
        for e in &file.enums {
            bb.write_string(&e.name);
            write_location(&mut bb, e.location);
            write_options(&mut bb, &e.options);
            bb.write_var_uint(e.values.len() as u32);
            for value in &e.values {
                bb.write_string(&value.name);
                bb.write_var_int(value.number);
                write_location(&mut bb, value.location);
            }
        }

        bb.write_var_uint(file.services.len() as u32);
        for service in &file.services {
            bb.write_string(&service.name);
            write_location(&mut bb, service.location);
            write_options(&mut bb, &service.options);
            bb.write_var_uint(service.methods.len() as u32);
            for method in &service.methods {
                bb.write_string(&method.name);
                bb.write_string(&method.input_type);
                bb.write_string(&method.output_type);
                let mut flags = 0;
                if method.client_streaming {
                    flags |= CLIENT_STREAMING;
                }
                if method.server_streaming {
                    flags |= SERVER_STREAMING;
                }
                bb.write_byte(flags);
                write_location(&mut bb, method.location);
                write_options(&mut bb, &method.options);
            }
        }
    }

    Ok(bb.data())
}

fn write_location(bb: &mut ByteBufferMut, location: Location) {
    bb.write_var_uint(location.line as u32);
    bb.write_var_uint(location.column as u32);
}

fn write_options(bb: &mut ByteBufferMut, options: &[OptionValue]) {
    bb.write_var_uint(options.len() as u32);
    for option in options {
        bb.write_string(&option.name);
        bb.write_string(&option.value);
    }
}

/// Decode a binary descriptor back into a `DescriptorSet`.
/// Returns `Err(CompileError::DecodeError)` on truncated or invalid data.
pub fn decode_descriptor_set(buffer: &[u8]) -> Result<DescriptorSet, CompileError> {
    let mut bb = ByteBuffer::new(buffer);

    let magic = bb
        .read_bytes(DESCRIPTOR_MAGIC.len())
        .map_err(|_| CompileError::DecodeError("Buffer too short for a descriptor header".to_string()))?;
    if magic != DESCRIPTOR_MAGIC {
        return Err(CompileError::DecodeError("Missing PPXD descriptor magic".to_string()));
    }
    let version = bb.read_byte()?;
    if version != DESCRIPTOR_VERSION {
        return Err(CompileError::DecodeError(format!(
            "Unsupported descriptor version {}",
            version
        )));
    }

    let file_count = read_count(&mut bb, "file count")?;
    let mut files = Vec::with_capacity(file_count);
    for _ in 0..file_count {
        files.push(read_file(&mut bb)?);
    }

    if !bb.is_empty() {
        return Err(CompileError::DecodeError(format!(
            "{} trailing bytes after the last file",
            buffer.len() - bb.index()
        )));
    }

    Ok(DescriptorSet { files })
}

fn context(what: &'static str) -> impl Fn(WireError) -> CompileError {
    move |e| CompileError::DecodeError(format!("Failed to read {}: {}", what, e))
}

/// Counts are bounded by the remaining input so a corrupt length cannot
/// trigger a huge allocation.
fn read_count(bb: &mut ByteBuffer, what: &'static str) -> Result<usize, CompileError> {
    let count = bb.read_var_uint().map_err(context(what))? as usize;
    let remaining = bb.data().len() - bb.index();
    if count > remaining {
        return Err(CompileError::DecodeError(format!(
            "Invalid {} {} with only {} bytes left",
            what, count, remaining
        )));
    }
    Ok(count)
}

fn read_string(bb: &mut ByteBuffer, what: &'static str) -> Result<String, CompileError> {
    Ok(bb.read_string().map_err(context(what))?.to_string())
}

fn read_optional_string(bb: &mut ByteBuffer, what: &'static str) -> Result<Option<String>, CompileError> {
    let value = read_string(bb, what)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

fn read_location(bb: &mut ByteBuffer) -> Result<Location, CompileError> {
    let line = bb.read_var_uint().map_err(context("line"))? as usize;
    let column = bb.read_var_uint().map_err(context("column"))? as usize;
    Ok(Location { line, column })
}

fn read_options(bb: &mut ByteBuffer) -> Result<Vec<OptionValue>, CompileError> {
    let count = read_count(bb, "option count")?;
    let mut options = Vec::with_capacity(count);
    for _ in 0..count {
        options.push(OptionValue {
            name:  read_string(bb, "option name")?,
            value: read_string(bb, "option value")?,
        });
    }
    Ok(options)
}

fn read_file(bb: &mut ByteBuffer) -> Result<FileDescriptor, CompileError> {
    let name = read_string(bb, "file name")?;
    let package = read_optional_string(bb, "package")?;
    let syntax = read_optional_string(bb, "syntax")?;
    let dependencies = bb
        .read_string_list()
        .map_err(context("dependencies"))?
        .into_iter()
        .map(str::to_string)
        .collect();
    let options = read_options(bb)?;

    let message_count = read_count(bb, "message count")?;
    let mut messages = Vec::with_capacity(message_count);
    for _ in 0..message_count {
        let name = read_string(bb, "message name")?;
        let location = read_location(bb)?;
        let options = read_options(bb)?;

        let field_count = read_count(bb, "field count")?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(read_field(bb)?);
        }
        messages.push(Message { name, location, fields, options });
    }

    let enum_count = read_count(bb, "enum count")?;
    let mut enums = Vec::with_capacity(enum_count);
    for _ in 0..enum_count {
        let name = read_string(bb, "enum name")?;
        let location = read_location(bb)?;
        let options = read_options(bb)?;
        let value_count = read_count(bb, "enum value count")?;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(EnumValue {
                name:     read_string(bb, "enum value name")?,
                number:   bb.read_var_int().map_err(context("enum value number"))?,
                location: read_location(bb)?,
            });
        }
        enums.push(Enum { name, location, values, options });
    }

    let service_count = read_count(bb, "service count")?;
    let mut services = Vec::with_capacity(service_count);
    for _ in 0..service_count {
        let name = read_string(bb, "service name")?;
        let location = read_location(bb)?;
        let options = read_options(bb)?;
        let method_count = read_count(bb, "method count")?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            let name = read_string(bb, "method name")?;
            let input_type = read_string(bb, "method input type")?;
            let output_type = read_string(bb, "method output type")?;
            let flags = bb.read_byte().map_err(context("method flags"))?;
            if flags & !(CLIENT_STREAMING | SERVER_STREAMING) != 0 {
                return Err(CompileError::DecodeError(format!(
                    "Invalid flags {} for method {}",
                    flags, name
                )));
            }
            methods.push(Method {
                name,
                location: read_location(bb)?,
                input_type,
                output_type,
                client_streaming: flags & CLIENT_STREAMING != 0,
                server_streaming: flags & SERVER_STREAMING != 0,
                options: read_options(bb)?,
            });
        }
        services.push(Service { name, location, methods, options });
    }

    Ok(FileDescriptor {
        name,
        package,
        syntax,
        dependencies,
        options,
        messages,
        enums,
        services,
    })
}

fn read_field(bb: &mut ByteBuffer) -> Result<Field, CompileError> {
    let name = read_string(bb, "field name")?;
    let number = bb.read_var_int().map_err(context("field number"))?;

    let label = match bb.read_byte().map_err(context("field label"))? {
        0 => Label::Singular,
        1 => Label::Optional,
        2 => Label::Repeated,
        other => {
            return Err(CompileError::DecodeError(format!(
                "Invalid label {} for field {}",
                other, name
            )))
        }
    };

    let type_ = match bb.read_byte().map_err(context("field type kind"))? {
        TYPE_SCALAR => {
            let idx = bb.read_byte().map_err(context("scalar type"))?;
            if idx as usize >= SCALAR_TYPES.len() {
                return Err(CompileError::DecodeError(format!(
                    "Invalid scalar type index {} for field {}",
                    idx, name
                )));
            }
            FieldType::Scalar(idx)
        }
        TYPE_MESSAGE => FieldType::Message(read_string(bb, "message type name")?),
        TYPE_ENUM => FieldType::Enum(read_string(bb, "enum type name")?),
        other => {
            return Err(CompileError::DecodeError(format!(
                "Invalid type kind {} for field {}",
                other, name
            )))
        }
    };

    let deprecated = bb.read_bool().map_err(context("deprecated flag"))?;
    let location = read_location(bb)?;
    let options = read_options(bb)?;

    Ok(Field {
        name,
        number,
        label,
        type_,
        deprecated,
        location,
        options,
    })
}
