use crate::{
    tokenizer::Token,
    types::{Enum, EnumValue, Field, FieldType, FileDescriptor, Label, Location, Message, Method, OptionValue, Service},
    utils::{error, quote, unquote},
    error::CompileError,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER:       Regex = Regex::new(r"^\.?[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref NAME:             Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref OPTION_SUFFIX:    Regex = Regex::new(r"^\.[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
    static ref STRING:           Regex = Regex::new(r#"^("|')"#).unwrap();
    static ref INTEGER:          Regex = Regex::new(r"^-?\d+$").unwrap();
    static ref CONSTANT:         Regex = Regex::new(r#"^("|'|-?\d|[A-Za-z_])"#).unwrap();
    static ref EQUALS:           Regex = Regex::new(r"^=$").unwrap();
    static ref SEMICOLON:        Regex = Regex::new(r"^;$").unwrap();
    static ref COMMA:            Regex = Regex::new(r"^,$").unwrap();
    static ref LEFT_BRACE:       Regex = Regex::new(r"^\{$").unwrap();
    static ref RIGHT_BRACE:      Regex = Regex::new(r"^\}$").unwrap();
    static ref LEFT_PAREN:       Regex = Regex::new(r"^\($").unwrap();
    static ref RIGHT_PAREN:      Regex = Regex::new(r"^\)$").unwrap();
    static ref LEFT_BRACKET:     Regex = Regex::new(r"^\[$").unwrap();
    static ref RIGHT_BRACKET:    Regex = Regex::new(r"^\]$").unwrap();
    static ref SYNTAX_KEYWORD:   Regex = Regex::new(r"^syntax$").unwrap();
    static ref PACKAGE_KEYWORD:  Regex = Regex::new(r"^package$").unwrap();
    static ref IMPORT_KEYWORD:   Regex = Regex::new(r"^import$").unwrap();
    static ref IMPORT_MODIFIER:  Regex = Regex::new(r"^(public|weak)$").unwrap();
    static ref OPTION_KEYWORD:   Regex = Regex::new(r"^option$").unwrap();
    static ref RESERVED_KEYWORD: Regex = Regex::new(r"^reserved$").unwrap();
    static ref ENUM_KEYWORD:     Regex = Regex::new(r"^enum$").unwrap();
    static ref MESSAGE_KEYWORD:  Regex = Regex::new(r"^message$").unwrap();
    static ref SERVICE_KEYWORD:  Regex = Regex::new(r"^service$").unwrap();
    static ref RPC_KEYWORD:      Regex = Regex::new(r"^rpc$").unwrap();
    static ref RETURNS_KEYWORD:  Regex = Regex::new(r"^returns$").unwrap();
    static ref STREAM_KEYWORD:   Regex = Regex::new(r"^stream$").unwrap();
    static ref LABEL_KEYWORD:    Regex = Regex::new(r"^(repeated|optional)$").unwrap();
    static ref UNSUPPORTED:      Regex = Regex::new(r"^(message|enum|oneof|map|extend|extensions|group|required)$").unwrap();
    static ref EOF:              Regex = Regex::new(r"^$").unwrap();
}

/// Highest field number accepted by the wire format.
pub const MAX_FIELD_NUMBER: i32 = (1 << 29) - 1;

struct Cursor<'a> {
    tokens: &'a [Token],
    index:  usize,
}

impl<'a> Cursor<'a> {
    /// The tokenizer always appends an EOF token, so clamping to the last
    /// token never reads past the end.
    fn current(&self) -> &'a Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn location(&self) -> Location {
        let tok = self.current();
        Location { line: tok.line, column: tok.column }
    }

    fn peek(&self, test: &Regex) -> bool {
        test.is_match(&self.current().text)
    }

    fn eat(&mut self, test: &Regex) -> bool {
        if self.peek(test) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, test: &Regex, expected: &str) -> Result<&'a Token, CompileError> {
        let tok = self.current();
        if !self.eat(test) {
            return Err(error(
                &format!("Expected {} but found {}", expected, quote(&tok.text)),
                tok.line,
                tok.column,
            ));
        }
        Ok(tok)
    }

    fn unexpected_token(&self) -> CompileError {
        let tok = self.current();
        if tok.text.is_empty() {
            return error("Unexpected end of file", tok.line, tok.column);
        }
        error(
            &format!("Unexpected token {}", quote(&tok.text)),
            tok.line,
            tok.column,
        )
    }

    fn integer(&mut self) -> Result<i32, CompileError> {
        let tok = self.expect(&INTEGER, "integer")?;
        tok.text.parse::<i32>().map_err(|_| {
            error(
                &format!("Invalid integer {}", quote(&tok.text)),
                tok.line,
                tok.column,
            )
        })
    }
}

/// Parses the tokens of one schema file. `name` is the file's import path.
pub fn parse_schema(name: &str, tokens: &[Token]) -> Result<FileDescriptor, CompileError> {
    let mut file = FileDescriptor::new(name);
    let mut cursor = Cursor { tokens, index: 0 };

    parse_file(&mut cursor, &mut file).map_err(|e| e.in_file(name))?;
    Ok(file)
}

fn parse_file(cursor: &mut Cursor, file: &mut FileDescriptor) -> Result<(), CompileError> {
    while !cursor.eat(&EOF) {
        if cursor.peek(&SYNTAX_KEYWORD) {
            let tok = cursor.current();
            cursor.index += 1;
            if !file.dependencies.is_empty() || file.package.is_some() || file.syntax.is_some() {
                return Err(error("The syntax statement must come first", tok.line, tok.column));
            }
            cursor.expect(&EQUALS, "\"=\"")?;
            let value = cursor.expect(&STRING, "string")?;
            let syntax = unquote(value)?;
            if syntax != "proto3" && syntax != "proto2" {
                return Err(error(
                    &format!("Unknown syntax {}", quote(&syntax)),
                    value.line,
                    value.column,
                ));
            }
            file.syntax = Some(syntax);
            cursor.expect(&SEMICOLON, "\";\"")?;
        } else if cursor.peek(&PACKAGE_KEYWORD) {
            let tok = cursor.current();
            cursor.index += 1;
            if file.package.is_some() {
                return Err(error("Multiple package statements", tok.line, tok.column));
            }
            let pkg = cursor.expect(&IDENTIFIER, "package name")?;
            file.package = Some(pkg.text.trim_start_matches('.').to_string());
            cursor.expect(&SEMICOLON, "\";\"")?;
        } else if cursor.eat(&IMPORT_KEYWORD) {
            cursor.eat(&IMPORT_MODIFIER);
            let path = cursor.expect(&STRING, "import path")?;
            file.dependencies.push(unquote(path)?);
            cursor.expect(&SEMICOLON, "\";\"")?;
        } else if cursor.eat(&OPTION_KEYWORD) {
            file.options.push(parse_option_statement(cursor)?);
        } else if cursor.eat(&ENUM_KEYWORD) {
            file.enums.push(parse_enum(cursor)?);
        } else if cursor.eat(&MESSAGE_KEYWORD) {
            file.messages.push(parse_message(cursor)?);
        } else if cursor.eat(&SERVICE_KEYWORD) {
            file.services.push(parse_service(cursor)?);
        } else if !cursor.eat(&SEMICOLON) {
            return Err(cursor.unexpected_token());
        }
    }
    Ok(())
}

/// `name = value` where the name is either plain or a parenthesised
/// extension name with an optional `.suffix`.
fn parse_option_body(cursor: &mut Cursor) -> Result<OptionValue, CompileError> {
    let name = if cursor.eat(&LEFT_PAREN) {
        let ext = cursor.expect(&IDENTIFIER, "option name")?;
        cursor.expect(&RIGHT_PAREN, "\")\"")?;
        let mut name = format!("({})", ext.text);
        if cursor.peek(&OPTION_SUFFIX) {
            name.push_str(&cursor.current().text);
            cursor.index += 1;
        }
        name
    } else {
        cursor.expect(&IDENTIFIER, "option name")?.text.clone()
    };

    cursor.expect(&EQUALS, "\"=\"")?;
    let value = parse_option_value(cursor)?;
    Ok(OptionValue { name, value })
}

fn parse_option_statement(cursor: &mut Cursor) -> Result<OptionValue, CompileError> {
    let option = parse_option_body(cursor)?;
    cursor.expect(&SEMICOLON, "\";\"")?;
    Ok(option)
}

/// Scalar constants are stored as written (strings unquoted); aggregate
/// `{ ... }` values are kept as their space-joined token text.
fn parse_option_value(cursor: &mut Cursor) -> Result<String, CompileError> {
    if cursor.peek(&LEFT_BRACE) {
        let open = cursor.current();
        let mut depth = 0usize;
        let mut parts = Vec::new();
        loop {
            let tok = cursor.current();
            if tok.text.is_empty() {
                return Err(error("Unterminated option value", open.line, open.column));
            }
            cursor.index += 1;
            if LEFT_BRACE.is_match(&tok.text) {
                depth += 1;
            } else if RIGHT_BRACE.is_match(&tok.text) {
                depth -= 1;
            }
            parts.push(tok.text.as_str());
            if depth == 0 {
                break;
            }
        }
        return Ok(parts.join(" "));
    }

    let tok = cursor.expect(&CONSTANT, "constant")?;
    if STRING.is_match(&tok.text) {
        let mut value = unquote(tok)?;
        // Adjacent string literals concatenate.
        while cursor.peek(&STRING) {
            value.push_str(&unquote(cursor.current())?);
            cursor.index += 1;
        }
        Ok(value)
    } else {
        Ok(tok.text.clone())
    }
}

/// `[a = 1, (b) = "x"]` after a field or enum value.
fn parse_field_options(cursor: &mut Cursor) -> Result<Vec<OptionValue>, CompileError> {
    let mut options = Vec::new();
    if !cursor.eat(&LEFT_BRACKET) {
        return Ok(options);
    }
    loop {
        options.push(parse_option_body(cursor)?);
        if cursor.eat(&RIGHT_BRACKET) {
            break;
        }
        cursor.expect(&COMMA, "\",\" or \"]\"")?;
    }
    Ok(options)
}

/// `reserved 2, 15 to 20;` or `reserved "foo";` carry no information for
/// code generation; the statement is consumed up to its semicolon.
fn skip_statement(cursor: &mut Cursor) -> Result<(), CompileError> {
    while !cursor.eat(&SEMICOLON) {
        if cursor.peek(&EOF) || cursor.peek(&RIGHT_BRACE) {
            return Err(cursor.unexpected_token());
        }
        cursor.index += 1;
    }
    Ok(())
}

fn parse_enum(cursor: &mut Cursor) -> Result<Enum, CompileError> {
    let location = cursor.location();
    let name = cursor.expect(&NAME, "identifier")?;
    cursor.expect(&LEFT_BRACE, "\"{\"")?;

    let mut result = Enum {
        name: name.text.clone(),
        location,
        values: Vec::new(),
        options: Vec::new(),
    };

    while !cursor.eat(&RIGHT_BRACE) {
        if cursor.eat(&OPTION_KEYWORD) {
            result.options.push(parse_option_statement(cursor)?);
        } else if cursor.eat(&RESERVED_KEYWORD) {
            skip_statement(cursor)?;
        } else if cursor.eat(&SEMICOLON) {
            continue;
        } else {
            let location = cursor.location();
            let value_name = cursor.expect(&NAME, "enum value name").map_err(|_| cursor.unexpected_token())?;
            cursor.expect(&EQUALS, "\"=\"")?;
            let number = cursor.integer()?;
            parse_field_options(cursor)?;
            cursor.expect(&SEMICOLON, "\";\"")?;
            result.values.push(EnumValue {
                name: value_name.text.clone(),
                number,
                location,
            });
        }
    }

    Ok(result)
}

fn parse_message(cursor: &mut Cursor) -> Result<Message, CompileError> {
    let location = cursor.location();
    let name = cursor.expect(&NAME, "identifier")?;
    cursor.expect(&LEFT_BRACE, "\"{\"")?;

    let mut message = Message {
        name: name.text.clone(),
        location,
        fields: Vec::new(),
        options: Vec::new(),
    };

    while !cursor.eat(&RIGHT_BRACE) {
        if cursor.eat(&OPTION_KEYWORD) {
            message.options.push(parse_option_statement(cursor)?);
            continue;
        }
        if cursor.eat(&RESERVED_KEYWORD) {
            skip_statement(cursor)?;
            continue;
        }
        if cursor.eat(&SEMICOLON) {
            continue;
        }
        if cursor.peek(&UNSUPPORTED) {
            let tok = cursor.current();
            return Err(error(
                &format!("{} inside a message is not supported by the built-in compiler", quote(&tok.text)),
                tok.line,
                tok.column,
            ));
        }
        if cursor.peek(&EOF) {
            return Err(cursor.unexpected_token());
        }

        let location = cursor.location();
        let label = match cursor.current().text.as_str() {
            "repeated" if cursor.eat(&LABEL_KEYWORD) => Label::Repeated,
            "optional" if cursor.eat(&LABEL_KEYWORD) => Label::Optional,
            _ => Label::Singular,
        };

        let type_tok = cursor.expect(&IDENTIFIER, "field type")?;
        let type_ = FieldType::scalar(&type_tok.text)
            .unwrap_or_else(|| FieldType::Unresolved(type_tok.text.clone()));

        let field_name = cursor.expect(&NAME, "field name")?;
        cursor.expect(&EQUALS, "\"=\"")?;
        let number_tok = cursor.current();
        let number = cursor.integer()?;
        if number <= 0 || number > MAX_FIELD_NUMBER {
            return Err(error(
                &format!("Field number {} is out of range", number),
                number_tok.line,
                number_tok.column,
            ));
        }

        let options = parse_field_options(cursor)?;
        cursor.expect(&SEMICOLON, "\";\"")?;

        let deprecated = options
            .iter()
            .any(|o| o.name == "deprecated" && o.value == "true");

        message.fields.push(Field {
            name: field_name.text.clone(),
            number,
            label,
            type_,
            deprecated,
            location,
            options,
        });
    }

    Ok(message)
}

fn parse_service(cursor: &mut Cursor) -> Result<Service, CompileError> {
    let location = cursor.location();
    let name = cursor.expect(&NAME, "identifier")?;
    cursor.expect(&LEFT_BRACE, "\"{\"")?;

    let mut service = Service {
        name: name.text.clone(),
        location,
        methods: Vec::new(),
        options: Vec::new(),
    };

    while !cursor.eat(&RIGHT_BRACE) {
        if cursor.eat(&OPTION_KEYWORD) {
            service.options.push(parse_option_statement(cursor)?);
        } else if cursor.eat(&SEMICOLON) {
            continue;
        } else if cursor.peek(&RPC_KEYWORD) {
            service.methods.push(parse_method(cursor)?);
        } else {
            return Err(cursor.unexpected_token());
        }
    }

    Ok(service)
}

fn parse_method(cursor: &mut Cursor) -> Result<Method, CompileError> {
    let location = cursor.location();
    cursor.expect(&RPC_KEYWORD, "\"rpc\"")?;
    let name = cursor.expect(&NAME, "method name")?;

    cursor.expect(&LEFT_PAREN, "\"(\"")?;
    let client_streaming = cursor.eat(&STREAM_KEYWORD);
    let input = cursor.expect(&IDENTIFIER, "request type")?;
    cursor.expect(&RIGHT_PAREN, "\")\"")?;

    cursor.expect(&RETURNS_KEYWORD, "\"returns\"")?;

    cursor.expect(&LEFT_PAREN, "\"(\"")?;
    let server_streaming = cursor.eat(&STREAM_KEYWORD);
    let output = cursor.expect(&IDENTIFIER, "response type")?;
    cursor.expect(&RIGHT_PAREN, "\")\"")?;

    let mut options = Vec::new();
    if cursor.eat(&LEFT_BRACE) {
        while !cursor.eat(&RIGHT_BRACE) {
            if cursor.eat(&OPTION_KEYWORD) {
                options.push(parse_option_statement(cursor)?);
            } else if !cursor.eat(&SEMICOLON) {
                return Err(cursor.unexpected_token());
            }
        }
    } else {
        cursor.expect(&SEMICOLON, "\";\" or \"{\"")?;
    }

    Ok(Method {
        name: name.text.clone(),
        location,
        input_type: input.text.clone(),
        output_type: output.text.clone(),
        client_streaming,
        server_streaming,
        options,
    })
}
