// src/demo.rs

//! Demo render payload: a flat-shaded triangle with a slowly cycling tint.
//!
//! This is the external collaborator of the presentation engine — the
//! engine only ever sees it as a render callback. Everything here draws
//! into whichever buffer the rendering context currently has bound.

use std::ffi::{CStr, CString};
use std::ptr;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::gles::*;

const VERTEX_SHADER: &str = "\
precision mediump float;
attribute vec4 a_Position;
void main() {
    gl_Position = a_Position;
}
";

const FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform vec4 u_Color;
void main() {
    gl_FragColor = u_Color;
}
";

pub struct Scene {
    program: GLuint,
    color_location: GLint,
    _vbo: GLuint,
}

impl Scene {
    /// Compiles and links the shaders, uploads the triangle, and sets the
    /// viewport. Requires a current rendering context.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        log_renderer_banner();

        let vertex = compile_shader(GL_VERTEX_SHADER, VERTEX_SHADER)
            .context("Vertex shader compilation failed")?;
        let fragment = compile_shader(GL_FRAGMENT_SHADER, FRAGMENT_SHADER)
            .context("Fragment shader compilation failed")?;
        let program = link_program(vertex, fragment).context("Shader program linking failed")?;

        let vertices: [GLfloat; 6] = [
            0.0, 0.5, // top
            -0.5, -0.5, // bottom left
            0.5, -0.5, // bottom right
        ];

        let position_name = CString::new("a_Position").unwrap();
        let color_name = CString::new("u_Color").unwrap();

        let (vbo, color_location) = unsafe {
            glUseProgram(program);

            let mut vbo: GLuint = 0;
            glGenBuffers(1, &mut vbo);
            glBindBuffer(GL_ARRAY_BUFFER, vbo);
            glBufferData(
                GL_ARRAY_BUFFER,
                std::mem::size_of_val(&vertices) as GLsizeiptr,
                vertices.as_ptr().cast(),
                GL_STATIC_DRAW,
            );

            let position = glGetAttribLocation(program, position_name.as_ptr());
            if position < 0 {
                return Err(anyhow!("Attribute a_Position not found in program"));
            }
            glVertexAttribPointer(
                position as GLuint,
                2,
                GL_FLOAT,
                GL_FALSE,
                2 * std::mem::size_of::<GLfloat>() as GLsizei,
                ptr::null(),
            );
            glEnableVertexAttribArray(position as GLuint);

            glViewport(0, 0, width as GLsizei, height as GLsizei);

            (vbo, glGetUniformLocation(program, color_name.as_ptr()))
        };

        info!("Scene ready, viewport {}x{}", width, height);

        Ok(Scene {
            program,
            color_location,
            _vbo: vbo,
        })
    }

    /// Draws one frame into the currently bound buffer.
    pub fn draw(&self, frame: u64) {
        let phase = (frame % 240) as f32 / 240.0;
        unsafe {
            glUseProgram(self.program);
            glClearColor(0.0, 0.5, 1.0, 1.0);
            glClear(GL_COLOR_BUFFER_BIT);
            glUniform4f(self.color_location, 1.0 - phase, phase, 0.25, 1.0);
            glDrawArrays(GL_TRIANGLES, 0, 3);
        }
    }
}

fn compile_shader(kind: GLenum, source: &str) -> Result<GLuint> {
    let source = CString::new(source).context("Shader source contained a NUL byte")?;
    unsafe {
        let shader = glCreateShader(kind);
        if shader == 0 {
            return Err(anyhow!("glCreateShader returned 0"));
        }
        glShaderSource(shader, 1, &source.as_ptr(), ptr::null());
        glCompileShader(shader);

        let mut status: GLint = 0;
        glGetShaderiv(shader, GL_COMPILE_STATUS, &mut status);
        if status == 0 {
            let log = shader_info_log(shader);
            glDeleteShader(shader);
            return Err(anyhow!("{}", log));
        }
        Ok(shader)
    }
}

fn link_program(vertex: GLuint, fragment: GLuint) -> Result<GLuint> {
    unsafe {
        let program = glCreateProgram();
        if program == 0 {
            return Err(anyhow!("glCreateProgram returned 0"));
        }
        glAttachShader(program, vertex);
        glAttachShader(program, fragment);
        glLinkProgram(program);

        let mut status: GLint = 0;
        glGetProgramiv(program, GL_LINK_STATUS, &mut status);
        if status == 0 {
            let mut len: GLint = 0;
            glGetProgramiv(program, GL_INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            glGetProgramInfoLog(
                program,
                buf.len() as GLsizei,
                ptr::null_mut(),
                buf.as_mut_ptr().cast(),
            );
            let log = String::from_utf8_lossy(&buf);
            return Err(anyhow!("{}", log.trim_end_matches('\0').trim_end()));
        }
        Ok(program)
    }
}

unsafe fn shader_info_log(shader: GLuint) -> String {
    let mut len: GLint = 0;
    glGetShaderiv(shader, GL_INFO_LOG_LENGTH, &mut len);
    let mut buf = vec![0u8; len.max(1) as usize];
    glGetShaderInfoLog(shader, buf.len() as GLsizei, ptr::null_mut(), buf.as_mut_ptr().cast());
    String::from_utf8_lossy(&buf).trim_end_matches('\0').to_string()
}

fn log_renderer_banner() {
    let describe = |name: GLenum| -> String {
        let ptr = unsafe { glGetString(name) };
        if ptr.is_null() {
            return "<unknown>".to_string();
        }
        unsafe { CStr::from_ptr(ptr.cast()) }
            .to_string_lossy()
            .into_owned()
    };
    info!(
        "OpenGL ES: version {:?}, GLSL {:?}, vendor {:?}, renderer {:?}",
        describe(GL_VERSION),
        describe(GL_SHADING_LANGUAGE_VERSION),
        describe(GL_VENDOR),
        describe(GL_RENDERER),
    );
}
