use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use protoplex_compiler::{
    compile_files, compile_schema, decode_descriptor_set, decode_to_json, encode_descriptor_set,
    error::CompileError,
    gen_python::PYTHON_HEADER,
    gen_web::JS_HEADER,
    parser::parse_schema,
    tokenizer::tokenize_schema,
    types::{FieldType, Label},
    Emitter,
};

const API_PROTO: &str = r#"
syntax = "proto3";

package org.couchers.api;

import "google/api/annotations.proto";

option go_package = "couchers/api";

enum Kind {
  KIND_UNKNOWN = 0;
  KIND_HOST = 1;
}

message User {
  string name = 1;
  repeated int64 ids = 2;
  Kind kind = 3 [deprecated = true];
}

service Api {
  rpc GetUser(User) returns (User) {
    option (google.api.http) = { get: "/v1/user" };
  }
  rpc Watch(User) returns (stream User);
}
"#;

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

#[test]
fn test_parse_schema() {
    let tokens = tokenize_schema(API_PROTO).expect("tokenize_schema failed");
    let file = parse_schema("api.proto", &tokens).expect("parse_schema failed");

    assert_eq!(file.name, "api.proto");
    assert_eq!(file.syntax.as_deref(), Some("proto3"));
    assert_eq!(file.package.as_deref(), Some("org.couchers.api"));
    assert_eq!(file.dependencies, vec!["google/api/annotations.proto"]);
    assert_eq!(file.options[0].name, "go_package");
    assert_eq!(file.options[0].value, "couchers/api");

    let kind = &file.enums[0];
    assert_eq!(kind.name, "Kind");
    assert_eq!(kind.values.len(), 2);
    assert_eq!(kind.values[1].name, "KIND_HOST");
    assert_eq!(kind.values[1].number, 1);

    let user = &file.messages[0];
    assert_eq!(user.fields.len(), 3);
    assert_eq!(user.fields[0].type_, FieldType::scalar("string").unwrap());
    assert_eq!(user.fields[1].label, Label::Repeated);
    assert_eq!(user.fields[2].type_, FieldType::Unresolved("Kind".to_string()));
    assert!(user.fields[2].deprecated);
    assert_eq!(user.location.line, 15);

    let api = &file.services[0];
    assert_eq!(api.methods.len(), 2);
    assert_eq!(api.methods[0].options[0].name, "(google.api.http)");
    assert_eq!(api.methods[0].options[0].value, r#"{ get : "/v1/user" }"#);
    assert!(!api.methods[0].server_streaming);
    assert!(api.methods[1].server_streaming);
    assert!(!api.methods[1].client_streaming);
}

#[test]
fn test_parse_error_carries_file_and_location() {
    let input = "message A {\n  string name = ;\n}";
    let tokens = tokenize_schema(input).unwrap();
    let err = parse_schema("a.proto", &tokens).unwrap_err();
    match err {
        CompileError::ParseError { file, line, column, .. } => {
            assert_eq!(file, "a.proto");
            assert_eq!((line, column), (2, 17));
        }
        other => panic!("expected a ParseError but got {:?}", other),
    }
}

#[test]
fn test_string_escapes() {
    let input = "syntax = \"proto3\";\noption java_package = \"\\101\\x42\" 'C\\u0044';\n";
    let file = parse_schema("a.proto", &tokenize_schema(input).unwrap()).unwrap();
    assert_eq!(file.options[0].name, "java_package");
    assert_eq!(file.options[0].value, "ABCD");

    let input = "syntax = \"proto3\";\noption go_package = \"couchers\\0api\";\n";
    match parse_schema("a.proto", &tokenize_schema(input).unwrap()).unwrap_err() {
        CompileError::ParseError { msg, line, column, .. } => {
            assert!(msg.contains("NUL"), "{}", msg);
            assert_eq!((line, column), (2, 21));
        }
        other => panic!("expected a ParseError but got {:?}", other),
    }
}

#[test]
fn test_nested_definitions_are_rejected() {
    let input = "syntax = \"proto3\";\nmessage A {\n  message B {}\n}";
    let err = compile_schema("a.proto", input).unwrap_err();
    assert!(err.to_string().contains("not supported by the built-in compiler"), "{}", err);
}

#[test]
fn test_compile_files_resolves_imports() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "google/api/http.proto",
        "syntax = \"proto3\";\npackage google.api;\nmessage HttpRule { string get = 2; }\n",
    );
    write(
        dir.path(),
        "api.proto",
        "syntax = \"proto3\";\npackage org.couchers.api;\nimport \"google/api/http.proto\";\n\
         message Route { google.api.HttpRule rule = 1; }\n",
    );

    let set = compile_files(&[dir.path()], &["api.proto".to_string()]).unwrap();
    let names: Vec<&str> = set.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["google/api/http.proto", "api.proto"]);

    let route = &set.file("api.proto").unwrap().messages[0];
    assert_eq!(route.fields[0].type_, FieldType::Message("google.api.HttpRule".to_string()));
}

#[test]
fn test_first_include_path_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write(first.path(), "a.proto", "syntax = \"proto3\";\nmessage First {}\n");
    write(second.path(), "a.proto", "syntax = \"proto3\";\nmessage Second {}\n");

    let set = compile_files(&[first.path(), second.path()], &["a.proto".to_string()]).unwrap();
    assert_eq!(set.files[0].messages[0].name, "First");
}

#[test]
fn test_type_from_unimported_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.proto", "syntax = \"proto3\";\npackage p;\nmessage A {}\n");
    write(dir.path(), "b.proto", "syntax = \"proto3\";\npackage p;\nmessage B { A a = 1; }\n");

    let err = compile_files(&[dir.path()], &["a.proto".to_string(), "b.proto".to_string()]).unwrap_err();
    match err {
        CompileError::VerifierError { file, msg } => {
            assert_eq!(file, "b.proto");
            assert!(msg.contains("which is not imported"), "{}", msg);
        }
        other => panic!("expected a VerifierError but got {:?}", other),
    }
}

#[test]
fn test_import_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\n");
    write(dir.path(), "b.proto", "syntax = \"proto3\";\nimport \"a.proto\";\n");

    let err = compile_files(&[dir.path()], &["a.proto".to_string()]).unwrap_err();
    match err {
        CompileError::ImportError { msg, .. } => {
            assert_eq!(msg, "import cycle: a.proto -> b.proto -> a.proto");
        }
        other => panic!("expected an ImportError but got {:?}", other),
    }
}

#[test]
fn test_missing_import() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.proto", "syntax = \"proto3\";\nimport \"missing.proto\";\n");

    let err = compile_files(&[dir.path()], &["a.proto".to_string()]).unwrap_err();
    assert!(
        matches!(&err, CompileError::ImportError { file, import, .. } if file == "a.proto" && import == "missing.proto"),
        "{:?}",
        err
    );
}

#[test]
fn test_verifier_rejections() {
    let cases = [
        ("message A { int32 x = 1; int32 y = 1; }", "is used twice"),
        ("message A { int32 x = 1; string x = 2; }", "is defined twice"),
        ("message A { int32 x = 19500; }", "reserved range"),
        ("enum E { E_ONE = 1; }", "must be zero"),
        ("message A { Missing m = 1; }", "is not defined"),
        ("message A {}\nmessage A {}", "is already defined"),
        ("message A {}\nenum E { E_ZERO = 0; }\nservice S { rpc M(A) returns (E); }", "must use message types"),
    ];

    for (body, expected) in cases {
        let text = format!("syntax = \"proto3\";\n{}\n", body);
        let err = compile_schema("x.proto", &text).unwrap_err();
        assert!(err.to_string().contains(expected), "{}: {}", body, err);
    }
}

#[test]
fn test_descriptor_keeps_everything() {
    let text = API_PROTO.replace("import \"google/api/annotations.proto\";", "");
    let (set, bin) = compile_schema("api.proto", &text).unwrap();
    assert_eq!(&bin[..4], b"PPXD");

    let decoded = decode_descriptor_set(&bin).unwrap();
    assert_eq!(decoded, set);
    assert_eq!(decoded.files[0].messages[0].fields[2].type_, FieldType::Enum("org.couchers.api.Kind".to_string()));
    assert_eq!(encode_descriptor_set(&decoded).unwrap(), bin);
}

#[test]
fn test_descriptor_rejects_bad_input() {
    let (_, bin) = compile_schema("a.proto", "syntax = \"proto3\";\nmessage A { int32 x = 1; }\n").unwrap();

    assert!(decode_descriptor_set(b"NOPE\x01\x00").is_err());
    assert!(decode_descriptor_set(&bin[..bin.len() - 1]).is_err());

    let mut trailing = bin.clone();
    trailing.push(0);
    let err = decode_descriptor_set(&trailing).unwrap_err();
    assert!(err.to_string().contains("trailing"), "{}", err);
}

#[test]
fn test_decode_to_json() {
    let (_, bin) = compile_schema("a.proto", "syntax = \"proto3\";\npackage p;\nmessage A { int32 x = 1; }\n").unwrap();
    let json = decode_to_json(&bin).unwrap();
    assert!(json.contains("\"name\": \"a.proto\""));
    assert!(json.contains("\"package\": \"p\""));
}

#[test]
fn test_emitters() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "google/api/http.proto",
        "syntax = \"proto3\";\npackage google.api;\nmessage HttpRule { string get = 2; }\n",
    );
    write(
        dir.path(),
        "api.proto",
        "syntax = \"proto3\";\npackage org.couchers.api;\nimport \"google/api/http.proto\";\n\
         message User { string name = 1; google.api.HttpRule rule = 2; }\n\
         service Api {\n  rpc GetUser(User) returns (User);\n  rpc Watch(User) returns (stream User);\n  rpc Upload(stream User) returns (User);\n}\n",
    );
    let set = compile_files(&[dir.path()], &["api.proto".to_string()]).unwrap();
    let api = set.file("api.proto").unwrap();

    let python = Emitter::PythonMessages.emit(&set, api);
    assert_eq!(python.len(), 1);
    assert_eq!(python[0].path, "api_pb2.py");
    assert!(python[0].content.lines().take(5).any(|l| l == PYTHON_HEADER));
    assert!(python[0].content.contains("from google.api import http_pb2 as google_dot_api_dot_http__pb2"));
    assert!(python[0].content.contains("class User:"));

    let grpc = Emitter::PythonGrpc.emit(&set, api);
    assert_eq!(grpc[0].path, "api_pb2_grpc.py");
    assert!(grpc[0].content.contains("import api_pb2 as api__pb2"));
    assert!(grpc[0].content.contains("channel.unary_stream("));
    assert!(grpc[0].content.contains("def add_ApiServicer_to_server(servicer, server):"));

    let web = Emitter::BrowserTransport.emit(&set, api);
    let paths: Vec<&str> = web.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["api_pb.js", "api_pb.d.ts", "api_grpc_web_pb.js", "api_grpc_web_pb.d.ts"]);
    assert!(web[0].content.starts_with(JS_HEADER));
    assert!(web[0].content.contains("class User extends jspb.Message"));
    assert!(web[0].content.contains("require('./google/api/http_pb.js')"));
    assert!(web[2].content.contains("rpcCall(this.hostname_ + '/org.couchers.api.Api/GetUser'"));
    assert!(web[2].content.contains("serverStreaming(this.hostname_ + '/org.couchers.api.Api/Watch'"));
    assert!(web[2].content.contains("// Upload is client-streaming"));

    let http = set.file("google/api/http.proto").unwrap();
    let web = Emitter::BrowserTransport.emit(&set, http);
    assert_eq!(web.len(), 2);
}

/// Body of the top-level block starting at the line `header`, up to the next
/// line at column zero.
fn block<'a>(content: &'a str, header: &str) -> Vec<&'a str> {
    content
        .lines()
        .skip_while(|line| *line != header)
        .skip(1)
        .take_while(|line| line.is_empty() || line.starts_with(' '))
        .collect()
}

#[test]
fn test_stub_serializers_are_defined() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "google/api/http.proto",
        "syntax = \"proto3\";\npackage google.api;\nmessage HttpRule { string get = 2; repeated sint64 weights = 3; }\n",
    );
    write(
        dir.path(),
        "api.proto",
        "syntax = \"proto3\";\npackage org.couchers.api;\nimport \"google/api/http.proto\";\n\
         enum Kind { KIND_UNKNOWN = 0; KIND_HOST = 1; }\n\
         message Ping {}\n\
         message User { string name = 1; repeated int64 ids = 2; Kind kind = 3; google.api.HttpRule rule = 4; repeated User friends = 5; optional bytes avatar = 6; }\n\
         service Api {\n  rpc GetUser(Ping) returns (User);\n  rpc Watch(Ping) returns (stream User);\n}\n",
    );
    let set = compile_files(&[dir.path()], &["api.proto".to_string()]).unwrap();
    let api = set.file("api.proto").unwrap();

    let python = &Emitter::PythonMessages.emit(&set, api)[0].content;
    let grpc = &Emitter::PythonGrpc.emit(&set, api)[0].content;
    for class in ["Ping", "User"] {
        assert!(grpc.contains(&format!("api__pb2.{}.SerializeToString", class)), "{}", grpc);
        assert!(grpc.contains(&format!("api__pb2.{}.FromString", class)), "{}", grpc);

        let body = block(python, &format!("class {}:", class));
        assert!(body.contains(&"    def SerializeToString(self):"), "{:?}", body);
        assert!(body.contains(&"    @classmethod"), "{:?}", body);
        assert!(body.contains(&"    def FromString(cls, data):"), "{:?}", body);
    }
    assert!(python.contains("def _serialize(message):"));
    assert!(python.contains("def _parse(cls, data):"));
    assert_eq!(
        block(python, "User._FIELDS = ("),
        vec![
            "    (1, 'name', 'string', 'singular', None),",
            "    (2, 'ids', 'int64', 'repeated', None),",
            "    (3, 'kind', 'enum', 'singular', Kind),",
            "    (4, 'rule', 'message', 'singular', google_dot_api_dot_http__pb2.HttpRule),",
            "    (5, 'friends', 'message', 'repeated', User),",
            "    (6, 'avatar', 'bytes', 'optional', None),",
        ]
    );
    assert_eq!(block(python, "Ping._FIELDS = ("), Vec::<&str>::new());

    let web = Emitter::BrowserTransport.emit(&set, api);
    let (js, client) = (&web[0].content, &web[2].content);
    assert!(client.contains("(request) => request.serializeBinary(),"));
    for class in ["Ping", "User"] {
        let body = block(js, &format!("class {} extends jspb.Message {{", class));
        for method in [
            "  serializeBinary() {",
            "  static serializeBinaryToWriter(message, writer) {",
            "  static deserializeBinary(bytes) {",
            "  static deserializeBinaryFromReader(msg, reader) {",
        ] {
            assert!(body.contains(&method), "{} lacks {}", class, method);
        }
    }
    assert!(client.contains("api_pb.User.deserializeBinary"), "{}", client);
    assert!(js.contains("writer.writePackedInt64(2, f);"));
    assert!(js.contains("writer.writeMessage(4, f, google_api_http_pb.HttpRule.serializeBinaryToWriter);"));
    assert!(js.contains("writer.writeRepeatedMessage(5, f, User.serializeBinaryToWriter);"));
    assert!(js.contains("if (jspb.Message.getField(message, 6) != null) {"));
    assert!(js.contains("reader.isDelimited() ? reader.readPackedInt64() : [reader.readInt64()]"));

    let http = set.file("google/api/http.proto").unwrap();
    let http_js = &Emitter::BrowserTransport.emit(&set, http)[0].content;
    assert!(http_js.contains("writer.writePackedSint64(3, f);"));
}
