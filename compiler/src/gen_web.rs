use std::collections::BTreeSet;

use crate::{
    types::{DefinitionKind, DescriptorSet, Field, FieldType, FileDescriptor, Label, Method},
    utils::{relative_module, to_lower_camel_case, to_pascal_case},
};

pub const JS_HEADER: &str = "// Generated by protoplex.  DO NOT EDIT!";
pub const GRPC_WEB_HEADER: &str = "// Generated by the protoplex gRPC-Web plugin.  DO NOT EDIT!";

/// JS identifier bound to the message module of `stem`: `google/api/http` → `google_api_http_pb`.
fn module_var(stem: &str) -> String {
    format!("{}_pb", stem.replace('/', "_"))
}

/// Stems of every file (other than `file`) defining a type in `names`.
fn defining_stems<'s>(set: &'s DescriptorSet, file: &FileDescriptor, names: impl Iterator<Item = &'s str>) -> BTreeSet<&'s str> {
    names
        .filter_map(|name| set.find_definition(name))
        .filter(|(def_file, _, _)| def_file.name != file.name)
        .map(|(def_file, _, _)| def_file.stem())
        .collect()
}

fn type_ref(set: &DescriptorSet, file: &FileDescriptor, full_name: &str) -> String {
    match set.find_definition(full_name) {
        Some((def_file, local, _)) if def_file.name == file.name => local.to_string(),
        Some((def_file, local, _)) => format!("{}.{}", module_var(def_file.stem()), local),
        None => "Object".to_string(),
    }
}

fn ts_scalar(name: &str) -> (&'static str, &'static str) {
    match name {
        "bool" => ("boolean", "false"),
        "string" => ("string", "\"\""),
        "bytes" => ("Uint8Array | string", "\"\""),
        _ => ("number", "0"),
    }
}

fn field_referenced_types(file: &FileDescriptor) -> impl Iterator<Item = &str> {
    file.messages
        .iter()
        .flat_map(|m| m.fields.iter())
        .filter_map(|f| match &f.type_ {
            FieldType::Message(name) | FieldType::Enum(name) => Some(name.as_str()),
            _ => None,
        })
}

/// jspb reader/writer method suffix for a field: `Int32`, `String`,
/// `Enum`, `Message`.
fn binary_suffix(type_: &FieldType) -> String {
    match type_ {
        FieldType::Enum(_) => "Enum".to_string(),
        FieldType::Message(_) | FieldType::Unresolved(_) => "Message".to_string(),
        scalar => to_pascal_case(scalar.scalar_name().unwrap_or("int32")),
    }
}

/// Whether repeated values of this type go on the wire packed.
fn is_packable(type_: &FieldType) -> bool {
    match type_ {
        FieldType::Enum(_) => true,
        FieldType::Scalar(_) => !matches!(type_.scalar_name(), Some("string") | Some("bytes")),
        _ => false,
    }
}

/// `serializeBinaryToWriter` body: proto3 skips singular fields holding
/// their default value.
fn write_field(set: &DescriptorSet, file: &FileDescriptor, f: &Field, out: &mut Vec<String>) {
    let suffix = binary_suffix(&f.type_);
    let accessor = to_pascal_case(&f.name);
    match (&f.type_, f.label) {
        (FieldType::Message(name), Label::Repeated) => {
            let ty = type_ref(set, file, name);
            out.push(format!("    f = message.get{}List();", accessor));
            out.push("    if (f.length > 0) {".to_string());
            out.push(format!("      writer.writeRepeatedMessage({}, f, {}.serializeBinaryToWriter);", f.number, ty));
            out.push("    }".to_string());
        }
        (FieldType::Message(name), _) => {
            let ty = type_ref(set, file, name);
            out.push(format!("    f = message.get{}();", accessor));
            out.push("    if (f != null) {".to_string());
            out.push(format!("      writer.writeMessage({}, f, {}.serializeBinaryToWriter);", f.number, ty));
            out.push("    }".to_string());
        }
        (type_, Label::Repeated) => {
            let method = if is_packable(type_) { "writePacked" } else { "writeRepeated" };
            out.push(format!("    f = message.get{}List();", accessor));
            out.push("    if (f.length > 0) {".to_string());
            out.push(format!("      writer.{}{}({}, f);", method, suffix, f.number));
            out.push("    }".to_string());
        }
        (type_, label) => {
            let present = match (label, type_.scalar_name()) {
                (Label::Optional, _) => format!("jspb.Message.getField(message, {}) != null", f.number),
                (_, Some("string")) | (_, Some("bytes")) => "f.length > 0".to_string(),
                (_, Some("bool")) => "f".to_string(),
                _ => "f !== 0".to_string(),
            };
            out.push(format!("    f = message.get{}();", accessor));
            out.push(format!("    if ({}) {{", present));
            out.push(format!("      writer.write{}({}, f);", suffix, f.number));
            out.push("    }".to_string());
        }
    }
}

/// One `case` of `deserializeBinaryFromReader`.
fn read_field(set: &DescriptorSet, file: &FileDescriptor, f: &Field, out: &mut Vec<String>) {
    let suffix = binary_suffix(&f.type_);
    out.push(format!("      case {}: {{", f.number));
    match (&f.type_, f.label) {
        (FieldType::Message(name), label) => {
            let ty = type_ref(set, file, name);
            out.push(format!("        const value = new {}();", ty));
            out.push(format!("        reader.readMessage(value, {}.deserializeBinaryFromReader);", ty));
            if label == Label::Repeated {
                out.push(format!(
                    "        jspb.Message.addToRepeatedWrapperField(msg, {}, value, {});",
                    f.number, ty
                ));
            } else {
                out.push(format!("        jspb.Message.setWrapperField(msg, {}, value);", f.number));
            }
        }
        (type_, Label::Repeated) if is_packable(type_) => {
            out.push(format!(
                "        const values = reader.isDelimited() ? reader.readPacked{}() : [reader.read{}()];",
                suffix, suffix
            ));
            out.push("        for (const value of values) {".to_string());
            out.push(format!("          jspb.Message.addToRepeatedField(msg, {}, value);", f.number));
            out.push("        }".to_string());
        }
        (_, Label::Repeated) => {
            out.push(format!(
                "        jspb.Message.addToRepeatedField(msg, {}, reader.read{}());",
                f.number, suffix
            ));
        }
        _ => {
            out.push(format!("        jspb.Message.setField(msg, {}, reader.read{}());", f.number, suffix));
        }
    }
    out.push("        break;".to_string());
    out.push("      }".to_string());
}

/// Message bindings (`x_pb.js`) in CommonJS form on top of `google-protobuf`.
pub fn generate_js_messages(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();
    out.push(JS_HEADER.to_string());
    out.push(format!("// source: {}", file.name));
    out.push("'use strict';".to_string());
    out.push(String::new());
    out.push("const jspb = require('google-protobuf');".to_string());

    for stem in defining_stems(set, file, field_referenced_types(file)) {
        out.push(format!(
            "const {} = require('{}.js');",
            module_var(stem),
            relative_module(file.stem(), &module_var_path(stem))
        ));
    }

    let mut exported = Vec::new();

    for e in &file.enums {
        out.push(String::new());
        out.push(format!("const {} = {{", e.name));
        for value in &e.values {
            out.push(format!("  {}: {},", value.name, value.number));
        }
        out.push("};".to_string());
        exported.push(e.name.clone());
    }

    for message in &file.messages {
        let repeated: Vec<String> = message
            .fields
            .iter()
            .filter(|f| f.label == Label::Repeated)
            .map(|f| f.number.to_string())
            .collect();
        let repeated_js = if repeated.is_empty() {
            "null".to_string()
        } else {
            format!("[{}]", repeated.join(", "))
        };

        out.push(String::new());
        out.push(format!("class {} extends jspb.Message {{", message.name));
        out.push("  constructor(opt_data) {".to_string());
        out.push("    super();".to_string());
        out.push(format!("    jspb.Message.initialize(this, opt_data, 0, -1, {}, null);", repeated_js));
        out.push("  }".to_string());

        for f in &message.fields {
            let accessor = to_pascal_case(&f.name);
            out.push(String::new());
            match (&f.type_, f.label) {
                (FieldType::Message(name), Label::Repeated) => {
                    let ty = type_ref(set, file, name);
                    out.push(format!("  get{}List() {{", accessor));
                    out.push(format!("    return jspb.Message.getRepeatedWrapperField(this, {}, {});", ty, f.number));
                    out.push("  }".to_string());
                    out.push(format!("  set{}List(value) {{", accessor));
                    out.push(format!("    return jspb.Message.setRepeatedWrapperField(this, {}, value);", f.number));
                    out.push("  }".to_string());
                }
                (FieldType::Message(name), _) => {
                    let ty = type_ref(set, file, name);
                    out.push(format!("  get{}() {{", accessor));
                    out.push(format!("    return jspb.Message.getWrapperField(this, {}, {});", ty, f.number));
                    out.push("  }".to_string());
                    out.push(format!("  set{}(value) {{", accessor));
                    out.push(format!("    return jspb.Message.setWrapperField(this, {}, value);", f.number));
                    out.push("  }".to_string());
                    out.push(format!("  has{}() {{", accessor));
                    out.push(format!("    return jspb.Message.getField(this, {}) != null;", f.number));
                    out.push("  }".to_string());
                }
                (_, Label::Repeated) => {
                    out.push(format!("  get{}List() {{", accessor));
                    out.push(format!("    return jspb.Message.getRepeatedField(this, {});", f.number));
                    out.push("  }".to_string());
                    out.push(format!("  set{}List(value) {{", accessor));
                    out.push(format!("    return jspb.Message.setField(this, {}, value || []);", f.number));
                    out.push("  }".to_string());
                }
                (type_, _) => {
                    let default = match type_.scalar_name() {
                        Some(scalar) => ts_scalar(scalar).1,
                        None => "0",
                    };
                    out.push(format!("  get{}() {{", accessor));
                    out.push(format!("    return jspb.Message.getFieldWithDefault(this, {}, {});", f.number, default));
                    out.push("  }".to_string());
                    out.push(format!("  set{}(value) {{", accessor));
                    out.push(format!("    return jspb.Message.setField(this, {}, value);", f.number));
                    out.push("  }".to_string());
                }
            }
        }

        out.push(String::new());
        out.push("  serializeBinary() {".to_string());
        out.push("    const writer = new jspb.BinaryWriter();".to_string());
        out.push(format!("    {}.serializeBinaryToWriter(this, writer);", message.name));
        out.push("    return writer.getResultBuffer();".to_string());
        out.push("  }".to_string());

        out.push(String::new());
        out.push("  static serializeBinaryToWriter(message, writer) {".to_string());
        if !message.fields.is_empty() {
            out.push("    let f;".to_string());
        }
        for f in &message.fields {
            write_field(set, file, f, &mut out);
        }
        out.push("  }".to_string());

        out.push(String::new());
        out.push("  static deserializeBinary(bytes) {".to_string());
        out.push("    const reader = new jspb.BinaryReader(bytes);".to_string());
        out.push(format!(
            "    return {}.deserializeBinaryFromReader(new {}(), reader);",
            message.name, message.name
        ));
        out.push("  }".to_string());

        out.push(String::new());
        out.push("  static deserializeBinaryFromReader(msg, reader) {".to_string());
        out.push("    while (reader.nextField()) {".to_string());
        out.push("      if (reader.isEndGroup()) {".to_string());
        out.push("        break;".to_string());
        out.push("      }".to_string());
        out.push("      switch (reader.getFieldNumber()) {".to_string());
        for f in &message.fields {
            read_field(set, file, f, &mut out);
        }
        out.push("      default:".to_string());
        out.push("        reader.skipField();".to_string());
        out.push("      }".to_string());
        out.push("    }".to_string());
        out.push("    return msg;".to_string());
        out.push("  }".to_string());
        out.push("}".to_string());
        exported.push(message.name.clone());
    }

    out.push(String::new());
    out.push(format!("module.exports = {{ {} }};", exported.join(", ")));
    out.push(String::new());
    out.join("\n")
}

/// `x_pb.d.ts`, the typings for [`generate_js_messages`].
pub fn generate_js_messages_dts(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();
    out.push(JS_HEADER.to_string());
    out.push("import * as jspb from 'google-protobuf';".to_string());
    for stem in defining_stems(set, file, field_referenced_types(file)) {
        out.push(format!(
            "import * as {} from '{}';",
            module_var(stem),
            relative_module(file.stem(), &module_var_path(stem))
        ));
    }

    for e in &file.enums {
        out.push(String::new());
        out.push(format!("export enum {} {{", e.name));
        for value in &e.values {
            out.push(format!("  {} = {},", value.name, value.number));
        }
        out.push("}".to_string());
    }

    for message in &file.messages {
        out.push(String::new());
        out.push(format!("export class {} extends jspb.Message {{", message.name));
        for f in &message.fields {
            let accessor = to_pascal_case(&f.name);
            let ty = match &f.type_ {
                FieldType::Message(name) | FieldType::Enum(name) | FieldType::Unresolved(name) => type_ref(set, file, name),
                scalar => ts_scalar(scalar.scalar_name().unwrap_or("int32")).0.to_string(),
            };
            if f.label == Label::Repeated {
                out.push(format!("  get{}List(): Array<{}>;", accessor, ty));
                out.push(format!("  set{}List(value: Array<{}>): {};", accessor, ty, message.name));
            } else {
                let optional = if matches!(f.type_, FieldType::Message(_)) { " | undefined" } else { "" };
                out.push(format!("  get{}(): {}{};", accessor, ty, optional));
                out.push(format!("  set{}(value?: {}): {};", accessor, ty, message.name));
            }
        }
        out.push(String::new());
        out.push("  serializeBinary(): Uint8Array;".to_string());
        out.push(format!("  static serializeBinaryToWriter(message: {}, writer: jspb.BinaryWriter): void;", message.name));
        out.push(format!("  static deserializeBinary(bytes: Uint8Array): {};", message.name));
        out.push(format!(
            "  static deserializeBinaryFromReader(message: {}, reader: jspb.BinaryReader): {};",
            message.name, message.name
        ));
        out.push("}".to_string());
    }

    out.push(String::new());
    out.join("\n")
}

/// Path of the message module of `stem`, without extension.
fn module_var_path(stem: &str) -> String {
    format!("{}_pb", stem)
}

fn method_url(file: &FileDescriptor, service: &str, method: &Method) -> String {
    format!("/{}/{}", file.qualify(service), method.name)
}

fn rpc_types(file: &FileDescriptor) -> impl Iterator<Item = &str> {
    file.services
        .iter()
        .flat_map(|s| s.methods.iter())
        .flat_map(|m| [m.input_type.as_str(), m.output_type.as_str()])
}

/// gRPC-Web client (`x_grpc_web_pb.js`). Client-streaming methods are not
/// expressible over gRPC-Web and are left out.
pub fn generate_grpc_web(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();
    out.push(GRPC_WEB_HEADER.to_string());
    out.push(format!("// source: {}", file.name));
    out.push("'use strict';".to_string());
    out.push(String::new());
    out.push("const grpc = {};".to_string());
    out.push("grpc.web = require('grpc-web');".to_string());

    let own = module_var(file.stem());
    out.push(format!(
        "const {} = require('{}.js');",
        own,
        relative_module(file.stem(), &module_var_path(file.stem()))
    ));
    for stem in defining_stems(set, file, rpc_types(file)) {
        out.push(format!(
            "const {} = require('{}.js');",
            module_var(stem),
            relative_module(file.stem(), &module_var_path(stem))
        ));
    }

    let qualified = |full_name: &str| match set.find_definition(full_name) {
        Some((def_file, local, DefinitionKind::Message)) => format!("{}.{}", module_var(def_file.stem()), local),
        _ => "Object".to_string(),
    };

    let mut exported = Vec::new();
    for service in &file.services {
        let client = format!("{}Client", service.name);

        for m in service.methods.iter().filter(|m| !m.client_streaming) {
            let method_type = if m.server_streaming { "SERVER_STREAMING" } else { "UNARY" };
            out.push(String::new());
            out.push(format!("const methodDescriptor_{}_{} = new grpc.web.MethodDescriptor(", service.name, m.name));
            out.push(format!("  '{}',", method_url(file, &service.name, m)));
            out.push(format!("  grpc.web.MethodType.{},", method_type));
            out.push(format!("  {},", qualified(&m.input_type)));
            out.push(format!("  {},", qualified(&m.output_type)));
            out.push("  (request) => request.serializeBinary(),".to_string());
            out.push(format!("  {}.deserializeBinary", qualified(&m.output_type)));
            out.push(");".to_string());
        }

        out.push(String::new());
        out.push(format!("class {} {{", client));
        out.push("  constructor(hostname, credentials, options) {".to_string());
        out.push("    options = options || {};".to_string());
        out.push("    options.format = 'text';".to_string());
        out.push("    this.client_ = new grpc.web.GrpcWebClientBase(options);".to_string());
        out.push("    this.hostname_ = hostname.replace(/\\/+$/, '');".to_string());
        out.push("  }".to_string());

        for m in &service.methods {
            out.push(String::new());
            if m.client_streaming {
                out.push(format!("  // {} is client-streaming, which gRPC-Web cannot carry.", m.name));
                continue;
            }
            let descriptor = format!("methodDescriptor_{}_{}", service.name, m.name);
            let url = method_url(file, &service.name, m);
            if m.server_streaming {
                out.push(format!("  {}(request, metadata) {{", to_lower_camel_case(&m.name)));
                out.push(format!(
                    "    return this.client_.serverStreaming(this.hostname_ + '{}', request, metadata || {{}}, {});",
                    url, descriptor
                ));
            } else {
                out.push(format!("  {}(request, metadata, callback) {{", to_lower_camel_case(&m.name)));
                out.push(format!(
                    "    return this.client_.rpcCall(this.hostname_ + '{}', request, metadata || {{}}, {}, callback);",
                    url, descriptor
                ));
            }
            out.push("  }".to_string());
        }
        out.push("}".to_string());
        exported.push(client);
    }

    out.push(String::new());
    out.push(format!("module.exports = {{ {} }};", exported.join(", ")));
    out.push(String::new());
    out.join("\n")
}

/// `x_grpc_web_pb.d.ts`, the typings for [`generate_grpc_web`].
pub fn generate_grpc_web_dts(set: &DescriptorSet, file: &FileDescriptor) -> String {
    let mut out: Vec<String> = Vec::new();
    out.push(GRPC_WEB_HEADER.to_string());
    out.push("import * as grpcWeb from 'grpc-web';".to_string());
    out.push(String::new());

    let mut stems: BTreeSet<&str> = defining_stems(set, file, rpc_types(file));
    stems.insert(file.stem());
    for stem in stems {
        out.push(format!(
            "import * as {} from '{}';",
            module_var(stem),
            relative_module(file.stem(), &module_var_path(stem))
        ));
    }

    let qualified = |full_name: &str| match set.find_definition(full_name) {
        Some((def_file, local, _)) => format!("{}.{}", module_var(def_file.stem()), local),
        None => "any".to_string(),
    };

    for service in &file.services {
        out.push(String::new());
        out.push(format!("export class {}Client {{", service.name));
        out.push("  constructor(hostname: string, credentials?: null | { [index: string]: string; }, options?: null | { [index: string]: any; });".to_string());
        for m in service.methods.iter().filter(|m| !m.client_streaming) {
            out.push(String::new());
            let input = qualified(&m.input_type);
            let output = qualified(&m.output_type);
            if m.server_streaming {
                out.push(format!(
                    "  {}(request: {}, metadata?: grpcWeb.Metadata): grpcWeb.ClientReadableStream<{}>;",
                    to_lower_camel_case(&m.name),
                    input,
                    output
                ));
            } else {
                out.push(format!(
                    "  {}(request: {}, metadata: grpcWeb.Metadata | undefined, callback: (err: grpcWeb.RpcError, response: {}) => void): grpcWeb.ClientReadableStream<{}>;",
                    to_lower_camel_case(&m.name),
                    input,
                    output,
                    output
                ));
            }
        }
        out.push("}".to_string());
    }

    out.push(String::new());
    out.join("\n")
}
