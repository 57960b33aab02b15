//! Message abstraction — kind, routing fields, and typed arguments.
//!
//! A [`Message`] is the unit handed to and received from the transport.
//! The dispatch core never sees wire bytes; it sees routing accessors
//! (sender, destination, path, interface, member) and a typed argument
//! body with representation-controlled extraction.
//!
//! # Argument representations
//!
//! Extraction via [`Message::args_as`] is controlled by [`ArgRepr`]:
//!
//! - `utf8_strings`: string arguments come out as [`Value::Utf8`]
//!   (raw UTF-8 bytes) instead of [`Value::Str`].
//! - `byte_arrays`: byte-array arguments come out as [`Value::Bytes`]
//!   (one buffer) instead of a [`Value::Array`] of [`Value::Byte`].
//!
//! Argument-matcher evaluation always uses [`MATCH_REPR`] (both flags
//! on); handler invocation re-extracts with the handler's own flags when
//! they differ, so the two extractions are not assumed identical.

use crate::names::{
    validate_bus_name, validate_error_name, validate_interface_name, validate_member_name,
    validate_object_path, InvalidNameError,
};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Discriminant for the four message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A method call addressed to (destination, path, interface, member).
    MethodCall,
    /// A successful reply to a method call.
    MethodReturn,
    /// An error reply to a method call.
    Error,
    /// An asynchronous broadcast notification.
    Signal,
}

// ---------------------------------------------------------------------------
// Arg — wire-level typed argument
// ---------------------------------------------------------------------------

/// A typed argument in a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// UTF-8 string (`s`).
    Str(String),
    /// Byte array (`ay`).
    Bytes(Vec<u8>),
    /// Single byte (`y`).
    Byte(u8),
    /// Boolean (`b`).
    Bool(bool),
    /// 32-bit signed integer (`i`).
    Int32(i32),
    /// 32-bit unsigned integer (`u`).
    UInt32(u32),
    /// 64-bit signed integer (`x`).
    Int64(i64),
    /// 64-bit unsigned integer (`t`).
    UInt64(u64),
    /// Double-precision float (`d`).
    Double(f64),
    /// Object path (`o`).
    ObjectPath(String),
}

impl Arg {
    /// The signature token this argument satisfies.
    #[must_use]
    pub fn type_code(&self) -> &'static str {
        match self {
            Arg::Str(_) => "s",
            Arg::Bytes(_) => "ay",
            Arg::Byte(_) => "y",
            Arg::Bool(_) => "b",
            Arg::Int32(_) => "i",
            Arg::UInt32(_) => "u",
            Arg::Int64(_) => "x",
            Arg::UInt64(_) => "t",
            Arg::Double(_) => "d",
            Arg::ObjectPath(_) => "o",
        }
    }
}

// ---------------------------------------------------------------------------
// ArgRepr / Value — extraction representations
// ---------------------------------------------------------------------------

/// Representation flags for argument extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgRepr {
    /// Return strings as raw UTF-8 bytes ([`Value::Utf8`]).
    pub utf8_strings: bool,
    /// Return byte arrays as one buffer ([`Value::Bytes`]).
    pub byte_arrays: bool,
}

/// The fixed representation used for argument-matcher evaluation:
/// both flags on (the cheapest extraction, and the one match values are
/// compared under).
pub const MATCH_REPR: ArgRepr = ArgRepr {
    utf8_strings: true,
    byte_arrays: true,
};

/// An extracted argument value, in the representation the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unicode string (`utf8_strings` off).
    Str(String),
    /// Raw UTF-8 string bytes (`utf8_strings` on).
    Utf8(Vec<u8>),
    /// Byte array as one buffer (`byte_arrays` on).
    Bytes(Vec<u8>),
    /// Byte array as a list of bytes (`byte_arrays` off), or any other array.
    Array(Vec<Value>),
    /// Single byte.
    Byte(u8),
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// Double-precision float.
    Double(f64),
    /// Object path.
    ObjectPath(String),
}

impl Value {
    /// Returns the textual content if this value is a string in either
    /// representation (and, for [`Value::Utf8`], is valid UTF-8).
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Utf8(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

fn extract(arg: &Arg, repr: ArgRepr) -> Value {
    match arg {
        Arg::Str(s) => {
            if repr.utf8_strings {
                Value::Utf8(s.clone().into_bytes())
            } else {
                Value::Str(s.clone())
            }
        }
        Arg::Bytes(b) => {
            if repr.byte_arrays {
                Value::Bytes(b.clone())
            } else {
                Value::Array(b.iter().map(|&v| Value::Byte(v)).collect())
            }
        }
        Arg::Byte(v) => Value::Byte(*v),
        Arg::Bool(v) => Value::Bool(*v),
        Arg::Int32(v) => Value::Int32(*v),
        Arg::UInt32(v) => Value::UInt32(*v),
        Arg::Int64(v) => Value::Int64(*v),
        Arg::UInt64(v) => Value::UInt64(*v),
        Arg::Double(v) => Value::Double(*v),
        Arg::ObjectPath(p) => Value::ObjectPath(p.clone()),
    }
}

// ---------------------------------------------------------------------------
// EncodingError
// ---------------------------------------------------------------------------

/// The argument list does not fit the declared signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("arguments do not fit signature {signature:?}: {detail}")]
pub struct EncodingError {
    /// The declared signature.
    pub signature: String,
    /// What went wrong.
    pub detail: String,
}

fn parse_signature(signature: &str) -> Result<Vec<&'static str>, EncodingError> {
    let mut codes = Vec::new();
    let mut chars = signature.chars().peekable();
    while let Some(c) = chars.next() {
        let code = match c {
            's' => "s",
            'y' => "y",
            'b' => "b",
            'i' => "i",
            'u' => "u",
            'x' => "x",
            't' => "t",
            'd' => "d",
            'o' => "o",
            'a' => {
                if chars.next_if_eq(&'y').is_some() {
                    "ay"
                } else {
                    return Err(EncodingError {
                        signature: signature.to_string(),
                        detail: "only byte arrays ('ay') are supported as arrays".to_string(),
                    });
                }
            }
            other => {
                return Err(EncodingError {
                    signature: signature.to_string(),
                    detail: format!("unknown type code {other:?}"),
                })
            }
        };
        codes.push(code);
    }
    Ok(codes)
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A bus message: kind, routing fields, and a typed argument body.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    sender: Option<String>,
    destination: Option<String>,
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    no_reply: bool,
    args: Vec<Arg>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            sender: None,
            destination: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            no_reply: false,
            args: Vec::new(),
        }
    }

    /// Builds a signal message.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidNameError`] if the path, interface, or member is
    /// malformed.
    pub fn signal(path: &str, interface: &str, member: &str) -> Result<Self, InvalidNameError> {
        validate_object_path(path)?;
        validate_interface_name(interface)?;
        validate_member_name(member)?;
        let mut msg = Self::empty(MessageKind::Signal);
        msg.path = Some(path.to_string());
        msg.interface = Some(interface.to_string());
        msg.member = Some(member.to_string());
        Ok(msg)
    }

    /// Builds a method-call message.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidNameError`] if the destination, path, interface,
    /// or method name is malformed.
    pub fn method_call(
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        method: &str,
    ) -> Result<Self, InvalidNameError> {
        if let Some(dest) = destination {
            validate_bus_name(dest)?;
        }
        validate_object_path(path)?;
        if let Some(iface) = interface {
            validate_interface_name(iface)?;
        }
        validate_member_name(method)?;
        let mut msg = Self::empty(MessageKind::MethodCall);
        msg.destination = destination.map(str::to_string);
        msg.path = Some(path.to_string());
        msg.interface = interface.map(str::to_string);
        msg.member = Some(method.to_string());
        Ok(msg)
    }

    /// Builds a method-return message.
    #[must_use]
    pub fn method_return() -> Self {
        Self::empty(MessageKind::MethodReturn)
    }

    /// Builds an error message.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidNameError`] if the error name is malformed.
    pub fn error(error_name: &str) -> Result<Self, InvalidNameError> {
        validate_error_name(error_name)?;
        let mut msg = Self::empty(MessageKind::Error);
        msg.error_name = Some(error_name.to_string());
        Ok(msg)
    }

    /// Sets the sender (builder style).
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    /// Sets the destination (builder style).
    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    /// Marks the message as expecting no reply (fire-and-forget mode).
    pub fn set_no_reply(&mut self, no_reply: bool) {
        self.no_reply = no_reply;
    }

    /// The message kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The sending endpoint's unique name, if known.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The destination bus name, if any (broadcast signals have none).
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The object path.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The interface name.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The member (signal or method) name.
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// The error name (error messages only).
    #[must_use]
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    /// Whether the message expects no reply.
    #[must_use]
    pub fn no_reply(&self) -> bool {
        self.no_reply
    }

    /// Appends arguments under a signature.
    ///
    /// Validation is all-or-nothing: the body is untouched unless every
    /// argument fits its signature token.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if the signature contains an unknown
    /// type code, the argument count differs from the signature's token
    /// count, or an argument's type does not match its token.
    pub fn append_args(&mut self, signature: &str, args: Vec<Arg>) -> Result<(), EncodingError> {
        let codes = parse_signature(signature)?;
        if codes.len() != args.len() {
            return Err(EncodingError {
                signature: signature.to_string(),
                detail: format!(
                    "signature has {} tokens but {} arguments were supplied",
                    codes.len(),
                    args.len()
                ),
            });
        }
        for (position, (code, arg)) in codes.iter().zip(&args).enumerate() {
            if arg.type_code() != *code {
                return Err(EncodingError {
                    signature: signature.to_string(),
                    detail: format!(
                        "argument {position} has type {:?} but the signature requires {code:?}",
                        arg.type_code()
                    ),
                });
            }
        }
        self.args.extend(args);
        Ok(())
    }

    /// The raw argument body.
    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Extracts the arguments in the given representation.
    #[must_use]
    pub fn args_as(&self, repr: ArgRepr) -> Vec<Value> {
        self.args.iter().map(|a| extract(a, repr)).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
