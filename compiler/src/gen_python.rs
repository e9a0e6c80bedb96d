use std::collections::BTreeSet;

use crate::types::{DefinitionKind, DescriptorSet, FieldType, FileDescriptor, Label, Message};

/// First line the Import Rewriter looks for before touching a file.
pub const PYTHON_HEADER: &str = "# Generated by protoplex.  DO NOT EDIT!";
pub const PYTHON_GRPC_HEADER: &str = "# Generated by the protoplex gRPC plugin.  DO NOT EDIT!";

/// protoc's module alias: `google/api/http` → `google_dot_api_dot_http__pb2`.
pub fn python_module_alias(stem: &str) -> String {
    format!("{}_pb2", stem).replace('_', "__").replace('/', "_dot_")
}

/// The import statement protoc emits for the module generated from `stem`.
/// Files at the root are imported bare (`import api_pb2 as api__pb2`),
/// nested ones through their directory package
/// (`from google.api import http_pb2 as google_dot_api_dot_http__pb2`).
pub fn python_import(stem: &str) -> String {
    let alias = python_module_alias(stem);
    match stem.rsplit_once('/') {
        Some((dir, base)) => format!("from {} import {}_pb2 as {}", dir.replace('/', "."), base, alias),
        None => format!("import {}_pb2 as {}", stem, alias),
    }
}

/// Proto3 wire encoding shared by every message class of a module. Each
/// class lists its fields in `_FIELDS` as `(number, attribute, kind, label,
/// type)` tuples, assigned once every class of the module exists.
const PYTHON_WIRE_RUNTIME: &str = r#"_WIRE_TYPES = {
    'int32': 0, 'int64': 0, 'uint32': 0, 'uint64': 0, 'sint32': 0, 'sint64': 0,
    'bool': 0, 'enum': 0,
    'fixed64': 1, 'sfixed64': 1, 'double': 1,
    'string': 2, 'bytes': 2, 'message': 2,
    'fixed32': 5, 'sfixed32': 5, 'float': 5,
}
_STRUCT_FORMATS = {
    'fixed32': '<I', 'sfixed32': '<i', 'float': '<f',
    'fixed64': '<Q', 'sfixed64': '<q', 'double': '<d',
}


def _write_varint(out, value):
    value &= (1 << 64) - 1
    while True:
        bits = value & 0x7F
        value >>= 7
        if value:
            out.append(bits | 0x80)
        else:
            out.append(bits)
            return


def _read_varint(data, pos):
    result = 0
    shift = 0
    while True:
        if pos >= len(data):
            raise ValueError('truncated varint')
        byte = data[pos]
        pos += 1
        result |= (byte & 0x7F) << shift
        if not byte & 0x80:
            return result, pos
        shift += 7


def _signed64(value):
    value &= (1 << 64) - 1
    return value - (1 << 64) if value >> 63 else value


def _encode_value(out, kind, value):
    if kind in ('sint32', 'sint64'):
        _write_varint(out, (value << 1) ^ (value >> 63))
    elif kind in _STRUCT_FORMATS:
        out += struct.pack(_STRUCT_FORMATS[kind], value)
    elif kind == 'string':
        data = value.encode('utf-8')
        _write_varint(out, len(data))
        out += data
    elif kind == 'bytes':
        _write_varint(out, len(value))
        out += value
    elif kind == 'message':
        data = value.SerializeToString()
        _write_varint(out, len(data))
        out += data
    else:
        _write_varint(out, int(value))


def _decode_value(kind, type_, raw, chunk):
    if kind in _STRUCT_FORMATS:
        return struct.unpack(_STRUCT_FORMATS[kind], chunk)[0]
    if kind == 'string':
        return bytes(chunk).decode('utf-8')
    if kind == 'bytes':
        return bytes(chunk)
    if kind == 'message':
        return type_.FromString(bytes(chunk))
    if kind == 'bool':
        return bool(raw)
    if kind in ('sint32', 'sint64'):
        return (raw >> 1) ^ -(raw & 1)
    if kind in ('int32', 'int64'):
        return _signed64(raw)
    if kind == 'enum':
        try:
            return type_(_signed64(raw))
        except ValueError:
            return _signed64(raw)
    return raw


def _decode_packed(kind, type_, chunk):
    items = []
    pos = 0
    size = struct.calcsize(_STRUCT_FORMATS[kind]) if kind in _STRUCT_FORMATS else 0
    while pos < len(chunk):
        if size:
            items.append(_decode_value(kind, type_, None, chunk[pos:pos + size]))
            pos += size
        else:
            raw, pos = _read_varint(chunk, pos)
            items.append(_decode_value(kind, type_, raw, None))
    return items


def _serialize(message):
    out = bytearray()
    for number, name, kind, label, _ in message._FIELDS:
        value = getattr(message, name)
        wire_type = _WIRE_TYPES[kind]
        if label == 'repeated':
            if not value:
                continue
            if wire_type != 2:
                body = bytearray()
                for item in value:
                    _encode_value(body, kind, item)
                _write_varint(out, number << 3 | 2)
                _write_varint(out, len(body))
                out += body
                continue
            items = value
        elif value is None or (label == 'singular' and kind != 'message' and not value):
            continue
        else:
            items = [value]
        for item in items:
            _write_varint(out, number << 3 | wire_type)
            _encode_value(out, kind, item)
    return bytes(out)


def _parse(cls, data):
    fields = {field[0]: field for field in cls._FIELDS}
    message = cls()
    pos = 0
    while pos < len(data):
        key, pos = _read_varint(data, pos)
        number, wire_type = key >> 3, key & 7
        raw = chunk = None
        if wire_type == 0:
            raw, pos = _read_varint(data, pos)
        elif wire_type == 1:
            chunk, pos = data[pos:pos + 8], pos + 8
        elif wire_type == 2:
            length, pos = _read_varint(data, pos)
            chunk, pos = data[pos:pos + length], pos + length
        elif wire_type == 5:
            chunk, pos = data[pos:pos + 4], pos + 4
        else:
            raise ValueError('unsupported wire type %d' % wire_type)
        if pos > len(data):
            raise ValueError('truncated field %d' % number)
        field = fields.get(number)
        if field is None:
            continue
        _, name, kind, label, type_ = field
        if label == 'repeated':
            if wire_type == 2 and _WIRE_TYPES[kind] != 2:
                getattr(message, name).extend(_decode_packed(kind, type_, chunk))
            else:
                getattr(message, name).append(_decode_value(kind, type_, raw, chunk))
        else:
            setattr(message, name, _decode_value(kind, type_, raw, chunk))
    return message"#;

/// Escapes Python reserved keywords by suffixing with an underscore.
fn escape_python_keyword(s: &str) -> String {
    let keywords = [
        "False", "None", "True", "and", "as", "assert", "async", "await",
        "break", "class", "continue", "def", "del", "elif", "else", "except",
        "finally", "for", "from", "global", "if", "import", "in", "is",
        "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
        "while", "with", "yield",
    ];
    if keywords.contains(&s) {
        format!("{}_", s)
    } else {
        s.to_string()
    }
}

/// Python expression naming the class generated for `full_name`, as seen
/// from the module generated for `file`.
fn class_ref(set: &DescriptorSet, file: &FileDescriptor, full_name: &str) -> String {
    match set.find_definition(full_name) {
        Some((def_file, local, _)) if def_file.name == file.name => local.to_string(),
        Some((def_file, local, _)) => format!("{}.{}", python_module_alias(def_file.stem()), local),
        None => "object".to_string(),
    }
}

fn scalar_python_type(name: &str) -> (&'static str, &'static str) {
    match name {
        "double" | "float" => ("float", "0.0"),
        "bool" => ("bool", "False"),
        "string" => ("str", "''"),
        "bytes" => ("bytes", "b''"),
        _ => ("int", "0"),
    }
}

/// Annotation and default value for one dataclass field.
fn field_declaration(set: &DescriptorSet, file: &FileDescriptor, label: Label, type_: &FieldType) -> (String, String) {
    let (annotation, default) = match type_ {
        FieldType::Scalar(_) => {
            let (ty, default) = scalar_python_type(type_.scalar_name().unwrap_or("int32"));
            (ty.to_string(), default.to_string())
        }
        FieldType::Enum(name) => (format!("'{}'", class_ref(set, file, name)), "0".to_string()),
        FieldType::Message(name) | FieldType::Unresolved(name) => {
            (format!("'{}'", class_ref(set, file, name)), "None".to_string())
        }
    };

    match (label, type_) {
        (Label::Repeated, _) => (format!("List[{}]", annotation), "field(default_factory=list)".to_string()),
        (_, FieldType::Message(_)) | (Label::Optional, _) => (format!("Optional[{}]", annotation), "None".to_string()),
        _ => (annotation, default),
    }
}

fn generate_message(set: &DescriptorSet, file: &FileDescriptor, message: &Message) -> String {
    let mut lines = Vec::new();
    lines.push("@dataclass".to_string());
    lines.push(format!("class {}:", message.name));
    lines.push(format!("    \"\"\"{}\"\"\"", file.qualify(&message.name)));

    for f in &message.fields {
        let (annotation, default) = field_declaration(set, file, f.label, &f.type_);
        let mut line = format!("    {}: {} = {}", escape_python_keyword(&f.name), annotation, default);
        if f.deprecated {
            line.push_str("  # deprecated");
        }
        lines.push(line);
    }

    lines.push(String::new());
    lines.push(format!("    FIELD_NUMBERS = {{{}}}", message
        .fields
        .iter()
        .map(|f| format!("'{}': {}", f.name, f.number))
        .collect::<Vec<_>>()
        .join(", ")));
    lines.push(String::new());
    lines.push("    def SerializeToString(self):".to_string());
    lines.push("        return _serialize(self)".to_string());
    lines.push(String::new());
    lines.push("    @classmethod".to_string());
    lines.push("    def FromString(cls, data):".to_string());
    lines.push("        return _parse(cls, data)".to_string());

    lines.join("\n")
}

/// The `_FIELDS` table of `message`, one wire description per field.
fn field_table(set: &DescriptorSet, file: &FileDescriptor, message: &Message) -> String {
    let mut lines = vec![format!("{}._FIELDS = (", message.name)];
    for f in &message.fields {
        let (kind, type_) = match &f.type_ {
            FieldType::Scalar(_) => (f.type_.scalar_name().unwrap_or("int32"), "None".to_string()),
            FieldType::Enum(name) => ("enum", class_ref(set, file, name)),
            FieldType::Message(name) | FieldType::Unresolved(name) => ("message", class_ref(set, file, name)),
        };
        let label = match f.label {
            Label::Singular => "singular",
            Label::Optional => "optional",
            Label::Repeated => "repeated",
        };
        lines.push(format!(
            "    ({}, '{}', '{}', '{}', {}),",
            f.number,
            escape_python_keyword(&f.name),
            kind,
            label,
            type_
        ));
    }
    lines.push(")".to_string());
    lines.join("\n")
}

/// Python message module (`x_pb2.py`): an `IntEnum` per enum and a
/// dataclass per message.
pub fn generate_python_messages(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();

    out.push("# -*- coding: utf-8 -*-".to_string());
    out.push(PYTHON_HEADER.to_string());
    out.push(format!("# source: {}", file.name));
    out.push("\"\"\"Generated protocol buffer code.\"\"\"".to_string());
    out.push("import enum".to_string());
    out.push("import struct".to_string());
    out.push("from dataclasses import dataclass, field".to_string());
    out.push("from typing import List, Optional".to_string());
    out.push(String::new());

    for dep in &file.dependencies {
        let dep_stem = dep.strip_suffix(".proto").unwrap_or(dep);
        out.push(python_import(dep_stem));
    }
    if !file.dependencies.is_empty() {
        out.push(String::new());
    }

    out.push(format!("DESCRIPTOR_NAME = '{}'", file.name));
    out.push(format!("PACKAGE = '{}'", file.package.as_deref().unwrap_or("")));

    for e in &file.enums {
        out.push(String::new());
        out.push(String::new());
        out.push(format!("class {}(enum.IntEnum):", e.name));
        for value in &e.values {
            out.push(format!("    {} = {}", escape_python_keyword(&value.name), value.number));
        }
    }

    out.push(String::new());
    out.push(String::new());
    out.push(PYTHON_WIRE_RUNTIME.to_string());

    for message in &file.messages {
        out.push(String::new());
        out.push(String::new());
        out.push(generate_message(set, file, message));
    }

    // Field tables reference classes defined later in the module.
    if !file.messages.is_empty() {
        out.push(String::new());
        out.push(String::new());
    }
    for message in &file.messages {
        out.push(field_table(set, file, message));
    }

    out.push(String::new());
    out.join("\n")
}

fn call_kind(client_streaming: bool, server_streaming: bool) -> &'static str {
    match (client_streaming, server_streaming) {
        (false, false) => "unary_unary",
        (false, true) => "unary_stream",
        (true, false) => "stream_unary",
        (true, true) => "stream_stream",
    }
}

/// Python gRPC module (`x_pb2_grpc.py`): a `Stub`, a `Servicer` and an
/// `add_*_to_server` function per service.
pub fn generate_python_grpc(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();

    out.push(PYTHON_GRPC_HEADER.to_string());
    out.push("\"\"\"Client and server classes corresponding to protobuf-defined services.\"\"\"".to_string());
    out.push("import grpc".to_string());

    // Modules defining request/response types, this file's own module first.
    let mut modules = vec![file.stem().to_string()];
    let others: BTreeSet<&str> = file
        .services
        .iter()
        .flat_map(|s| s.methods.iter())
        .flat_map(|m| [m.input_type.as_str(), m.output_type.as_str()])
        .filter_map(|name| set.find_definition(name))
        .filter(|(def_file, _, kind)| *kind == DefinitionKind::Message && def_file.name != file.name)
        .map(|(def_file, _, _)| def_file.stem())
        .collect();
    modules.extend(others.into_iter().map(str::to_string));

    if !file.services.is_empty() {
        out.push(String::new());
        for stem in &modules {
            out.push(python_import(stem));
        }
    }

    let type_ref = |full_name: &str| match set.find_definition(full_name) {
        Some((def_file, local, _)) => format!("{}.{}", python_module_alias(def_file.stem()), local),
        None => "object".to_string(),
    };

    for service in &file.services {
        let full_service = file.qualify(&service.name);

        out.push(String::new());
        out.push(String::new());
        out.push(format!("class {}Stub(object):", service.name));
        out.push(String::new());
        out.push("    def __init__(self, channel):".to_string());
        out.push("        \"\"\"Constructor.".to_string());
        out.push(String::new());
        out.push("        Args:".to_string());
        out.push("            channel: A grpc.Channel.".to_string());
        out.push("        \"\"\"".to_string());
        if service.methods.is_empty() {
            out.push("        pass".to_string());
        }
        for m in &service.methods {
            out.push(format!(
                "        self.{} = channel.{}(\n                '/{}/{}',\n                request_serializer={}.SerializeToString,\n                response_deserializer={}.FromString,\n                )",
                m.name,
                call_kind(m.client_streaming, m.server_streaming),
                full_service,
                m.name,
                type_ref(&m.input_type),
                type_ref(&m.output_type),
            ));
        }

        out.push(String::new());
        out.push(String::new());
        out.push(format!("class {}Servicer(object):", service.name));
        if service.methods.is_empty() {
            out.push("    pass".to_string());
        }
        for m in &service.methods {
            let arg = if m.client_streaming { "request_iterator" } else { "request" };
            out.push(String::new());
            out.push(format!("    def {}(self, {}, context):", m.name, arg));
            out.push("        context.set_code(grpc.StatusCode.UNIMPLEMENTED)".to_string());
            out.push("        context.set_details('Method not implemented!')".to_string());
            out.push("        raise NotImplementedError('Method not implemented!')".to_string());
        }

        out.push(String::new());
        out.push(String::new());
        out.push(format!("def add_{}Servicer_to_server(servicer, server):", service.name));
        out.push("    rpc_method_handlers = {".to_string());
        for m in &service.methods {
            out.push(format!(
                "            '{}': grpc.{}_rpc_method_handler(\n                    servicer.{},\n                    request_deserializer={}.FromString,\n                    response_serializer={}.SerializeToString,\n            ),",
                m.name,
                call_kind(m.client_streaming, m.server_streaming),
                m.name,
                type_ref(&m.input_type),
                type_ref(&m.output_type),
            ));
        }
        out.push("    }".to_string());
        out.push("    generic_handler = grpc.method_handlers_generic_handler(".to_string());
        out.push(format!("            '{}', rpc_method_handlers)", full_service));
        out.push("    server.add_generic_rpc_handlers((generic_handler,))".to_string());
    }

    out.push(String::new());
    out.join("\n")
}
